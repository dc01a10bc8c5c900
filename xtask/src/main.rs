use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const APP_NAME: &str = "tri-app";

// ----------------------------------------------------------------
// Entry point
// ----------------------------------------------------------------

fn main() {
    if let Err(e) = try_main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    match env::args().nth(1).as_deref() {
        Some(task) => execute_graph(&all_tasks(), task),
        None => {
            eprintln!("Usage: cargo xtask <task>\n");
            eprintln!("Tasks:");
            for task in &all_tasks() {
                eprintln!("  {}", task.name);
            }
            std::process::exit(1);
        }
    }
}

// ----------------------------------------------------------------
// Task graph
// ----------------------------------------------------------------

struct Task {
    name: &'static str,
    deps: &'static [&'static str],
    run: fn() -> Result<()>,
}

fn noop() -> Result<()> {
    Ok(())
}

fn all_tasks() -> Vec<Task> {
    vec![
        Task {
            name: "cargo-build",
            deps: &[],
            run: cargo_build,
        },
        Task {
            name: "compile-shaders",
            deps: &[],
            run: compile_shaders,
        },
        Task {
            name: "copy-exe",
            deps: &["cargo-build"],
            run: copy_exe,
        },
        Task {
            name: "build",
            deps: &["cargo-build", "compile-shaders", "copy-exe"],
            run: noop,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Status {
    Succeeded,
    Failed,
    Skipped,
}

fn task_index(tasks: &[Task], name: &str) -> Result<usize> {
    tasks
        .iter()
        .position(|t| t.name == name)
        .ok_or_else(|| format!("unknown task: `{name}`").into())
}

fn collect_topo(
    tasks: &[Task],
    name: &str,
    visited: &mut Vec<bool>,
    order: &mut Vec<usize>,
) -> Result<()> {
    let idx = task_index(tasks, name)?;
    if visited[idx] {
        return Ok(());
    }
    visited[idx] = true;
    for &dep in tasks[idx].deps {
        collect_topo(tasks, dep, visited, order)?;
    }
    order.push(idx);
    Ok(())
}

/// Run `target` after its dependencies. A task whose dependency failed or was
/// skipped is skipped; independent tasks still run.
fn execute_graph(tasks: &[Task], target: &str) -> Result<()> {
    let mut visited = vec![false; tasks.len()];
    let mut order: Vec<usize> = Vec::new();
    collect_topo(tasks, target, &mut visited, &mut order)?;

    let mut statuses: Vec<Option<Status>> = vec![None; tasks.len()];

    for &idx in &order {
        let task = &tasks[idx];
        let mut blocked = false;
        for &dep in task.deps {
            let dep_idx = task_index(tasks, dep)?;
            blocked |= matches!(
                statuses[dep_idx],
                Some(Status::Failed | Status::Skipped)
            );
        }

        if blocked {
            eprintln!("skip: {}", task.name);
            statuses[idx] = Some(Status::Skipped);
            continue;
        }

        match (task.run)() {
            Ok(()) => statuses[idx] = Some(Status::Succeeded),
            Err(e) => {
                eprintln!("failed: {}: {e}", task.name);
                statuses[idx] = Some(Status::Failed);
            }
        }
    }

    let failed: Vec<&str> = order
        .iter()
        .filter(|&&i| statuses[i] == Some(Status::Failed))
        .map(|&i| tasks[i].name)
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{} task(s) failed: {}",
            failed.len(),
            failed.join(", ")
        )
        .into())
    }
}

// ----------------------------------------------------------------
// Task implementations
// ----------------------------------------------------------------

/// One SPIR-V output compiled from a single entry point of a Slang source.
struct ShaderOutput {
    source: &'static str,
    entry: &'static str,
    stage: &'static str,
    output: &'static str,
}

const SHADER_OUTPUTS: &[ShaderOutput] = &[
    ShaderOutput {
        source: "triangle.slang",
        entry: "vertexMain",
        stage: "vertex",
        output: "triangle.vert.spv",
    },
    ShaderOutput {
        source: "triangle.slang",
        entry: "fragmentMain",
        stage: "fragment",
        output: "triangle.frag.spv",
    },
];

/// Arguments for compiling one entry point of `src` to SPIR-V at `dst`.
///
/// slangc renames a lone entry point to `main` unless told to keep the
/// source name, and the pipeline looks stages up by their source names.
fn slangc_args(shader: &ShaderOutput, src: &Path, dst: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![src.into()];
    for arg in [
        "-entry",
        shader.entry,
        "-stage",
        shader.stage,
        "-fvk-use-entrypoint-name",
        "-target",
        "spirv",
        "-o",
    ] {
        args.push(arg.into());
    }
    args.push(dst.into());
    args
}

fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| "xtask has no parent directory".into())
}

fn out_dir(root: &Path) -> PathBuf {
    root.join("out").join(APP_NAME).join("debug")
}

fn is_up_to_date(src: &Path, dst: &Path) -> bool {
    let Ok(src_meta) = src.metadata() else {
        return false;
    };
    let Ok(dst_meta) = dst.metadata() else {
        return false;
    };
    let Ok(src_mtime) = src_meta.modified() else {
        return false;
    };
    let Ok(dst_mtime) = dst_meta.modified() else {
        return false;
    };
    src_mtime <= dst_mtime
}

fn run(cmd: &mut Command) -> Result<()> {
    let status = cmd.status()?;
    if !status.success() {
        return Err(format!(
            "command {:?} failed with {}",
            cmd.get_program(),
            status
        )
        .into());
    }
    Ok(())
}

fn cargo_build() -> Result<()> {
    let root = workspace_root()?;
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    run(Command::new(cargo)
        .args(["build", "-p", APP_NAME])
        .current_dir(&root))
}

fn compile_shaders() -> Result<()> {
    let root = workspace_root()?;
    let src_dir = root.join(APP_NAME).join("shaders");
    let shader_dir = out_dir(&root).join("shaders");
    fs::create_dir_all(&shader_dir)?;

    let mut compiled = 0u32;
    let mut skipped = 0u32;

    for shader in SHADER_OUTPUTS {
        let src = src_dir.join(shader.source);
        let dst = shader_dir.join(shader.output);

        if is_up_to_date(&src, &dst) {
            skipped += 1;
            continue;
        }

        println!(
            "Compiling {} ({}) -> {}",
            shader.source, shader.entry, shader.output
        );

        run(Command::new("slangc").args(slangc_args(shader, &src, &dst)))?;

        compiled += 1;
    }

    println!("Shaders: {compiled} compiled, {skipped} up-to-date");
    Ok(())
}

fn copy_if_changed(src: &Path, dst: &Path) -> Result<bool> {
    if is_up_to_date(src, dst) {
        return Ok(false);
    }
    fs::copy(src, dst)?;
    Ok(true)
}

fn copy_exe() -> Result<()> {
    let root = workspace_root()?;
    let out_dir = out_dir(&root);
    fs::create_dir_all(&out_dir)?;

    let exe_suffix = env::consts::EXE_SUFFIX;
    let exe_name = format!("{APP_NAME}{exe_suffix}");
    let src_exe = root.join("target").join("debug").join(&exe_name);
    let dst_exe = out_dir.join(&exe_name);

    if copy_if_changed(&src_exe, &dst_exe)? {
        println!("Copied {exe_name}");
    } else {
        println!("Up-to-date: {exe_name}");
    }

    #[cfg(windows)]
    {
        let src_pdb = root.join("target").join("debug").join("tri_app.pdb");
        let dst_pdb = out_dir.join("tri_app.pdb");
        copy_if_changed(&src_pdb, &dst_pdb)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RAN_OK: AtomicUsize = AtomicUsize::new(0);

    fn fail() -> Result<()> {
        Err("boom".into())
    }

    fn count_ok() -> Result<()> {
        RAN_OK.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn order_of(tasks: &[Task], target: &str) -> Vec<&'static str> {
        let mut visited = vec![false; tasks.len()];
        let mut order = Vec::new();
        collect_topo(tasks, target, &mut visited, &mut order).unwrap();
        order.into_iter().map(|i| tasks[i].name).collect()
    }

    #[test]
    fn build_runs_dependencies_first_once() {
        let order = order_of(&all_tasks(), "build");
        assert_eq!(
            order,
            ["cargo-build", "compile-shaders", "copy-exe", "build"]
        );
    }

    #[test]
    fn unknown_task_is_an_error() {
        let err = execute_graph(&all_tasks(), "deploy").unwrap_err();
        assert_eq!(err.to_string(), "unknown task: `deploy`");
    }

    #[test]
    fn failed_dependency_skips_dependents_only() {
        let tasks = [
            Task {
                name: "a",
                deps: &[],
                run: fail,
            },
            Task {
                name: "b",
                deps: &["a"],
                run: count_ok,
            },
            Task {
                name: "c",
                deps: &[],
                run: count_ok,
            },
            Task {
                name: "all",
                deps: &["b", "c"],
                run: count_ok,
            },
        ];

        let before = RAN_OK.load(Ordering::SeqCst);
        let err = execute_graph(&tasks, "all").unwrap_err();

        assert_eq!(err.to_string(), "1 task(s) failed: a");
        // Only "c" ran; "b" and "all" were skipped.
        assert_eq!(RAN_OK.load(Ordering::SeqCst) - before, 1);
    }

    #[test]
    fn shader_outputs_cover_both_stages() {
        let outputs: Vec<_> = SHADER_OUTPUTS
            .iter()
            .map(|s| (s.entry, s.stage, s.output))
            .collect();
        assert_eq!(
            outputs,
            [
                ("vertexMain", "vertex", "triangle.vert.spv"),
                ("fragmentMain", "fragment", "triangle.frag.spv"),
            ]
        );
    }

    #[test]
    fn slangc_keeps_source_entry_point_names() {
        let vertex = &SHADER_OUTPUTS[0];
        let args = slangc_args(
            vertex,
            Path::new("shaders/triangle.slang"),
            Path::new("out/triangle.vert.spv"),
        );
        let args: Vec<&str> = args.iter().filter_map(|a| a.to_str()).collect();

        assert_eq!(
            args,
            [
                "shaders/triangle.slang",
                "-entry",
                "vertexMain",
                "-stage",
                "vertex",
                "-fvk-use-entrypoint-name",
                "-target",
                "spirv",
                "-o",
                "out/triangle.vert.spv",
            ]
        );
    }
}
