//! Run state aggregation
//!
//! [`OrtRunInfo`] is a snapshot of a run's progress built from the persisted
//! jobs. It answers which stages can be scheduled next and whether the run is
//! done. It performs no I/O, so the same state always yields the same decision,
//! no matter in which order the worker messages arrived.

use std::collections::{BTreeSet, HashMap};

use crate::domain::job::{Job, JobStatus};
use crate::domain::run::OrtRunStatus;
use crate::domain::schedule::WorkerScheduleInfo;

/// Identifier and status of an existing job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
    pub id: i64,
    pub status: JobStatus,
}

impl<C> From<&Job<C>> for JobInfo {
    fn from(job: &Job<C>) -> Self {
        Self {
            id: job.id,
            status: job.status,
        }
    }
}

/// Progress of a single run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrtRunInfo {
    pub id: i64,
    pub config_worker_failed: bool,
    pub configured_jobs: BTreeSet<WorkerScheduleInfo>,
    pub job_infos: HashMap<WorkerScheduleInfo, JobInfo>,
}

impl OrtRunInfo {
    pub fn new(
        id: i64,
        config_worker_failed: bool,
        configured_jobs: BTreeSet<WorkerScheduleInfo>,
        job_infos: HashMap<WorkerScheduleInfo, JobInfo>,
    ) -> Self {
        Self {
            id,
            config_worker_failed,
            configured_jobs,
            job_infos,
        }
    }

    /// The stages that can be scheduled now
    ///
    /// A stage is ready when it is configured, has no job yet, all of its hard
    /// dependencies finished successfully, and none of the stages it runs after
    /// is still pending. After a failure only the stages that run after
    /// failures remain schedulable. A failed config stage blocks everything.
    pub fn next_jobs(&self) -> BTreeSet<WorkerScheduleInfo> {
        if self.config_worker_failed {
            return BTreeSet::new();
        }

        WorkerScheduleInfo::ALL
            .into_iter()
            .filter(|stage| self.is_ready(*stage))
            .collect()
    }

    /// Whether the config stage or any job failed
    pub fn is_failed(&self) -> bool {
        self.config_worker_failed
            || self
                .job_infos
                .values()
                .any(|info| info.status == JobStatus::Failed)
    }

    /// Whether any job has not reached a final state yet
    pub fn has_active_jobs(&self) -> bool {
        self.job_infos.values().any(|info| !info.status.is_final())
    }

    /// Nothing is running and nothing can be scheduled anymore
    pub fn is_complete(&self) -> bool {
        !self.has_active_jobs() && self.next_jobs().is_empty()
    }

    /// The status a completed run ends up in
    pub fn final_status(&self) -> OrtRunStatus {
        if self.is_failed() {
            OrtRunStatus::Failed
        } else if self
            .job_infos
            .values()
            .any(|info| info.status == JobStatus::FinishedWithIssues)
        {
            OrtRunStatus::FinishedWithIssues
        } else {
            OrtRunStatus::Finished
        }
    }

    fn is_ready(&self, stage: WorkerScheduleInfo) -> bool {
        !self.job_infos.contains_key(&stage)
            && self.can_run(stage)
            && !stage
                .runs_after_transitively()
                .into_iter()
                .any(|other| self.is_pending(other))
    }

    fn can_run(&self, stage: WorkerScheduleInfo) -> bool {
        self.configured_jobs.contains(&stage)
            && (!self.is_failed() || stage.runs_after_failure())
            && stage.depends_on().iter().all(|dependency| {
                self.job_infos
                    .get(dependency)
                    .is_some_and(|info| info.status.is_successful())
            })
    }

    /// A stage is pending while its job is active, or while it has no job but
    /// could still get one.
    fn is_pending(&self, stage: WorkerScheduleInfo) -> bool {
        match self.job_infos.get(&stage) {
            Some(info) => !info.status.is_final(),
            None => self.can_run(stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerScheduleInfo::*;

    fn info(
        configured: &[WorkerScheduleInfo],
        jobs: &[(WorkerScheduleInfo, JobStatus)],
    ) -> OrtRunInfo {
        OrtRunInfo::new(
            1,
            false,
            configured.iter().copied().collect(),
            jobs.iter()
                .enumerate()
                .map(|(id, (stage, status))| {
                    (
                        *stage,
                        JobInfo {
                            id: id as i64 + 1,
                            status: *status,
                        },
                    )
                })
                .collect(),
        )
    }

    fn set(stages: &[WorkerScheduleInfo]) -> BTreeSet<WorkerScheduleInfo> {
        stages.iter().copied().collect()
    }

    const ALL_STAGES: &[WorkerScheduleInfo] =
        &[Analyzer, Advisor, Scanner, Evaluator, Reporter, Notifier];

    #[test]
    fn test_config_failure_blocks_everything() {
        let states = [
            info(ALL_STAGES, &[]),
            info(ALL_STAGES, &[(Analyzer, JobStatus::Finished)]),
            info(
                ALL_STAGES,
                &[
                    (Analyzer, JobStatus::Finished),
                    (Advisor, JobStatus::Finished),
                    (Scanner, JobStatus::Failed),
                ],
            ),
        ];

        for mut state in states {
            state.config_worker_failed = true;
            assert!(state.next_jobs().is_empty());
            assert_eq!(state.final_status(), OrtRunStatus::Failed);
        }
    }

    #[test]
    fn test_analyzer_comes_first() {
        assert_eq!(info(ALL_STAGES, &[]).next_jobs(), set(&[Analyzer]));
        assert_eq!(info(&[Analyzer], &[]).next_jobs(), set(&[Analyzer]));
    }

    #[test]
    fn test_running_analyzer_blocks_everything() {
        for status in [JobStatus::Created, JobStatus::Scheduled, JobStatus::Running] {
            assert!(info(ALL_STAGES, &[(Analyzer, status)]).next_jobs().is_empty());
        }
    }

    #[test]
    fn test_advisor_and_scanner_run_in_parallel() {
        let state = info(ALL_STAGES, &[(Analyzer, JobStatus::Finished)]);
        assert_eq!(state.next_jobs(), set(&[Advisor, Scanner]));
    }

    #[test]
    fn test_analyzer_with_issues_unblocks_followers() {
        let state = info(ALL_STAGES, &[(Analyzer, JobStatus::FinishedWithIssues)]);
        assert_eq!(state.next_jobs(), set(&[Advisor, Scanner]));
    }

    #[test]
    fn test_evaluator_waits_for_advisor_and_scanner() {
        let state = info(
            ALL_STAGES,
            &[
                (Analyzer, JobStatus::Finished),
                (Advisor, JobStatus::Running),
                (Scanner, JobStatus::Finished),
            ],
        );
        assert!(state.next_jobs().is_empty());

        let state = info(
            ALL_STAGES,
            &[
                (Analyzer, JobStatus::Finished),
                (Advisor, JobStatus::Finished),
                (Scanner, JobStatus::Finished),
            ],
        );
        assert_eq!(state.next_jobs(), set(&[Evaluator]));
    }

    #[test]
    fn test_evaluator_only_waits_for_configured_stages() {
        let state = info(
            &[Analyzer, Scanner, Evaluator, Reporter],
            &[(Analyzer, JobStatus::Finished), (Scanner, JobStatus::Finished)],
        );
        assert_eq!(state.next_jobs(), set(&[Evaluator]));
    }

    #[test]
    fn test_failed_analyzer_short_circuits_to_reporter() {
        let state = info(
            &[Analyzer, Evaluator, Reporter],
            &[(Analyzer, JobStatus::Failed)],
        );
        assert_eq!(state.next_jobs(), set(&[Reporter]));

        let state = info(ALL_STAGES, &[(Analyzer, JobStatus::Failed)]);
        assert_eq!(state.next_jobs(), set(&[Reporter]));
    }

    #[test]
    fn test_failed_scanner_skips_evaluator_after_advisor() {
        let state = info(
            ALL_STAGES,
            &[
                (Analyzer, JobStatus::Finished),
                (Advisor, JobStatus::Running),
                (Scanner, JobStatus::Failed),
            ],
        );
        assert!(state.next_jobs().is_empty());

        let state = info(
            ALL_STAGES,
            &[
                (Analyzer, JobStatus::Finished),
                (Advisor, JobStatus::Finished),
                (Scanner, JobStatus::Failed),
            ],
        );
        assert_eq!(state.next_jobs(), set(&[Reporter]));
    }

    #[test]
    fn test_reporter_runs_after_evaluator() {
        let mut jobs = vec![
            (Analyzer, JobStatus::Finished),
            (Advisor, JobStatus::Finished),
            (Scanner, JobStatus::Finished),
            (Evaluator, JobStatus::Running),
        ];
        assert!(info(ALL_STAGES, &jobs).next_jobs().is_empty());

        jobs[3].1 = JobStatus::Failed;
        assert_eq!(info(ALL_STAGES, &jobs).next_jobs(), set(&[Reporter]));
    }

    #[test]
    fn test_reporter_directly_after_analyzer() {
        let state = info(&[Analyzer, Reporter], &[(Analyzer, JobStatus::Finished)]);
        assert_eq!(state.next_jobs(), set(&[Reporter]));
    }

    #[test]
    fn test_notifier_runs_after_reporter_in_any_outcome() {
        for status in [JobStatus::Finished, JobStatus::Failed] {
            let state = info(
                ALL_STAGES,
                &[
                    (Analyzer, JobStatus::Finished),
                    (Advisor, JobStatus::Finished),
                    (Scanner, JobStatus::Finished),
                    (Evaluator, JobStatus::Finished),
                    (Reporter, status),
                ],
            );
            assert_eq!(state.next_jobs(), set(&[Notifier]));
        }
    }

    #[test]
    fn test_notifier_only_configuration() {
        let state = info(&[Reporter, Notifier], &[(Reporter, JobStatus::Failed)]);
        assert_eq!(state.next_jobs(), set(&[Notifier]));
    }

    #[test]
    fn test_everything_done() {
        let state = info(
            ALL_STAGES,
            &[
                (Analyzer, JobStatus::Finished),
                (Advisor, JobStatus::Finished),
                (Scanner, JobStatus::Finished),
                (Evaluator, JobStatus::Finished),
                (Reporter, JobStatus::Finished),
                (Notifier, JobStatus::Finished),
            ],
        );
        assert!(state.next_jobs().is_empty());
        assert!(state.is_complete());
        assert_eq!(state.final_status(), OrtRunStatus::Finished);
    }

    #[test]
    fn test_failed_run_completes_with_failure() {
        let state = info(
            &[Analyzer, Evaluator, Reporter],
            &[(Analyzer, JobStatus::Failed), (Reporter, JobStatus::Finished)],
        );
        assert!(state.next_jobs().is_empty());
        assert!(state.is_complete());
        assert_eq!(state.final_status(), OrtRunStatus::Failed);
    }

    #[test]
    fn test_issues_reflected_in_final_status() {
        let state = info(
            &[Analyzer, Reporter],
            &[
                (Analyzer, JobStatus::FinishedWithIssues),
                (Reporter, JobStatus::Finished),
            ],
        );
        assert!(state.is_complete());
        assert_eq!(state.final_status(), OrtRunStatus::FinishedWithIssues);
    }

    #[test]
    fn test_active_job_keeps_run_open() {
        let state = info(
            ALL_STAGES,
            &[
                (Analyzer, JobStatus::Finished),
                (Advisor, JobStatus::Failed),
                (Scanner, JobStatus::Running),
            ],
        );
        assert!(state.next_jobs().is_empty());
        assert!(state.has_active_jobs());
        assert!(!state.is_complete());
    }

    #[test]
    fn test_unconfigured_stage_is_never_returned() {
        let state = info(&[Analyzer, Scanner], &[(Analyzer, JobStatus::Finished)]);
        assert_eq!(state.next_jobs(), set(&[Scanner]));
    }

    #[test]
    fn test_existing_job_is_not_returned_again() {
        let state = info(
            ALL_STAGES,
            &[(Analyzer, JobStatus::Finished), (Advisor, JobStatus::Created)],
        );
        assert_eq!(state.next_jobs(), set(&[Scanner]));
    }
}
