//! Offline plan commands: inspect how a markdown plan is streamed, parsed
//! and compiled without a database or a completion service.

use std::path::Path;

use anyhow::{Context, Result};
use futures::StreamExt;

use stride_core::compile::{IdStart, Level2Shape, OutlineCompiler};
use stride_core::generation::{PlanPrompt, PlanSource, ScriptedSource};
use stride_core::outline::parse_outline;
use stride_core::resegment::Resegmenter;

fn read_plan(file: &Path) -> Result<String> {
    std::fs::read_to_string(file)
        .with_context(|| format!("failed to read plan file {}", file.display()))
}

/// Print the outline of a plan file as JSON.
pub fn run_outline(file: &Path) -> Result<()> {
    let outline = parse_outline(&read_plan(file)?);
    if outline.is_empty() {
        eprintln!("warning: no level-1 headings found in {}", file.display());
    }
    println!("{}", serde_json::to_string_pretty(&outline)?);
    Ok(())
}

/// Print the insert operations a plan file compiles to.
pub fn run_compile(file: &Path, shape: Level2Shape, goal_id: i64, start: IdStart) -> Result<()> {
    let outline = parse_outline(&read_plan(file)?);
    let compiled = OutlineCompiler::new(shape).compile(&outline, start, goal_id);
    println!("{}", serde_json::to_string_pretty(&compiled.ops)?);
    eprintln!(
        "{} timelines, {} plan items ({shape} shape)",
        compiled.timelines().count(),
        compiled.plan_items().count()
    );
    Ok(())
}

/// Stream a plan file in fixed-size fragments and print each re-segmented
/// piece as a JSON string, one per line.
pub async fn run_replay(file: &Path, fragment_size: usize) -> Result<()> {
    let text = read_plan(file)?;
    let source = ScriptedSource::chunked(&text, fragment_size);
    let prompt = PlanPrompt::for_goal(file.display().to_string(), None, None);

    let mut fragments = source.open(&prompt).await?;
    let mut segmenter = Resegmenter::new();
    let mut pieces = 0usize;
    while let Some(fragment) = fragments.next().await {
        for piece in segmenter.push(&fragment?) {
            println!("{}", serde_json::to_string(&piece)?);
            pieces += 1;
        }
    }
    if let Some(rest) = segmenter.finish() {
        println!("{}", serde_json::to_string(&rest)?);
        pieces += 1;
    }

    eprintln!("{pieces} pieces from {} bytes", text.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_names_the_path() {
        let err = run_outline(Path::new("/nonexistent/plan.md")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/plan.md"));
    }

    #[tokio::test]
    async fn replay_reads_a_real_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("plan.md");
        std::fs::write(&path, "# Week 1\n- Install rustup\n").unwrap();

        run_replay(&path, 3).await.unwrap();
        run_outline(&path).unwrap();
        run_compile(&path, Level2Shape::Timeline, 1, IdStart::default()).unwrap();
    }
}
