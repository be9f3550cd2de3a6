//! Terminal progress bars for voxel loops.

use indicatif::{ProgressBar, ProgressStyle};
use phasegrid_analysis::ParallelVoxelEvaluator;
use std::sync::Arc;

/// Bar over `len` jobs, labelled with the stage name.
pub fn stage_bar(len: usize, stage: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg:>12} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_message(stage.to_string());
    pb
}

/// Copy of `evaluator` that advances `pb` once per finished job.
pub fn with_bar(evaluator: &ParallelVoxelEvaluator, pb: &ProgressBar) -> ParallelVoxelEvaluator {
    let pb = pb.clone();
    evaluator.clone().with_progress(Arc::new(move || pb.inc(1)))
}

/// Run `f` with an evaluator tracked by a bar of `len` jobs.
pub fn tracked<T>(
    evaluator: &ParallelVoxelEvaluator,
    len: usize,
    stage: &str,
    f: impl FnOnce(&ParallelVoxelEvaluator) -> T,
) -> T {
    let pb = stage_bar(len, stage);
    let result = f(&with_bar(evaluator, &pb));
    pb.finish_and_clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_counts_jobs() {
        let evaluator = ParallelVoxelEvaluator::new(2);
        let pb = stage_bar(10, "test");
        let tracked = with_bar(&evaluator, &pb);
        tracked
            .run(0..10, |i| Ok::<_, std::convert::Infallible>(i))
            .unwrap();
        assert_eq!(pb.position(), 10);
    }
}
