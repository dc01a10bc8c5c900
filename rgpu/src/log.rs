use ash::vk;

/// Lowest severity the debug messenger forwards into `tracing`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    pub fn message_severity(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        match self {
            VulkanLogLevel::Verbose => {
                Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR
            }
            VulkanLogLevel::Info => Severity::INFO | Severity::WARNING | Severity::ERROR,
            VulkanLogLevel::Warning => Severity::WARNING | Severity::ERROR,
            VulkanLogLevel::Error => Severity::ERROR,
        }
    }
}
