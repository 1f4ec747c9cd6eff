// src/foreman/propagate.rs

use tracing::{debug, warn};

use crate::archive::{Archive, RunId};
use crate::errors::Result;
use crate::foreman::Foreman;
use crate::foreman::expand::complete_from_child;
use crate::run::{ComponentKey, ComponentState, FailureStage, RunState};

impl Foreman {
    /// Record a failed or cancelled component and wind down every enclosing
    /// run.
    pub(crate) fn fail_component(
        &mut self,
        archive: &mut Archive,
        key: ComponentKey,
        stage: FailureStage,
        cancelled: bool,
    ) -> Result<()> {
        let coords = archive.coordinates(&key);
        if let Some(record) = archive.component_record_mut(&key) {
            let changed = if cancelled {
                record.cancel(Some(stage))
            } else {
                record.fail(stage)
            };
            if changed {
                warn!(
                    run_id = %self.run_id,
                    task = %key,
                    coordinates = %coords,
                    depth = coords.depth(),
                    %stage,
                    cancelled,
                    "task did not succeed"
                );
            }
        }
        mark_ancestors(archive, key.run(), cancelled)
    }

    /// Fail every component in `doomed`, then mop up.
    pub(crate) fn fail_doomed(
        &mut self,
        archive: &mut Archive,
        doomed: Vec<(ComponentKey, FailureStage)>,
    ) -> Result<()> {
        if doomed.is_empty() {
            return Ok(());
        }
        for (key, stage) in doomed {
            self.fail_component(archive, key, stage, false)?;
        }
        self.mop_up(archive, None)
    }

    /// Cancel every pending or ready component of the run tree. With
    /// `running_stage` set, running components are cancelled too.
    ///
    /// Afterwards every nested run left without active components is moved to
    /// its terminal state, innermost first.
    pub(crate) fn mop_up(
        &mut self,
        archive: &mut Archive,
        running_stage: Option<FailureStage>,
    ) -> Result<()> {
        let tree = archive.run_tree(self.run_id);
        let mut cancelled = 0usize;
        for id in tree.iter() {
            let run = archive.run_mut(*id)?;
            for key in run.component_keys() {
                let Some(record) = run.record_mut(&key) else {
                    continue;
                };
                let cancel = match record.state {
                    ComponentState::Pending | ComponentState::Ready => true,
                    ComponentState::Running => running_stage.is_some(),
                    _ => false,
                };
                if cancel && record.cancel(running_stage) {
                    cancelled += 1;
                }
            }
        }
        debug!(run_id = %self.run_id, cancelled, "mop-up finished");
        settle(archive, &tree)
    }
}

/// Move every run from `run` up to the top into failing (or cancelling).
pub(crate) fn mark_ancestors(archive: &mut Archive, run: RunId, cancelled: bool) -> Result<()> {
    let mut current = Some(run);
    while let Some(id) = current {
        let r = archive.run_mut(id)?;
        r.state = match r.state {
            RunState::Running | RunState::Pending if cancelled => RunState::Cancelling,
            RunState::Running | RunState::Pending | RunState::Cancelling if !cancelled => {
                RunState::Failing
            }
            other => other,
        };
        current = r.parent.map(|p| p.run);
    }
    Ok(())
}

/// Finish nested runs that have nothing left to do, children before parents,
/// and carry each outcome into the step that wraps it.
pub(crate) fn settle(archive: &mut Archive, tree: &[RunId]) -> Result<()> {
    for &id in tree.iter().rev() {
        let (parent, state) = {
            let run = archive.run(id)?;
            if run.is_top_level()
                || run.state.is_terminal()
                || !run.is_started()
                || run.has_active_components()
            {
                continue;
            }
            (run.parent, run.state)
        };
        let Some(link) = parent else { continue };

        let final_state = archive.run_mut(id)?.finish();
        debug!(run_id = %id, from = %state, to = %final_state, "nested run settled");

        match final_state {
            RunState::Successful => {
                complete_from_child(archive, link.run, link.step, id)?;
            }
            RunState::Failed => {
                let step = ComponentKey::Step {
                    run: link.run,
                    step: link.step,
                };
                if let Some(rec) = archive.component_record_mut(&step) {
                    rec.fail(FailureStage::SubRun);
                }
            }
            _ => {
                let step = ComponentKey::Step {
                    run: link.run,
                    step: link.step,
                };
                if let Some(rec) = archive.component_record_mut(&step) {
                    rec.cancel(Some(FailureStage::SubRun));
                }
            }
        }
    }
    Ok(())
}
