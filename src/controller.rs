//! Calibration Controller - reconciliation of the calibration graph
//!
//! The controller keeps every node of a calibration DAG "in spec" with as
//! few physical measurements as possible:
//! 1. **Maintain**: post-order walk. Dependencies are reconciled first, then
//!    the node is skipped (still valid), probed (cheap), or recalibrated.
//! 2. **Diagnose**: top-down root-cause search, started when a probe shows
//!    the trusted baseline contradicts reality. Repairs only the
//!    dependencies that are actually broken.
//!
//! Measurements are blocking calls into the [`MeasurementExecutor`]; the
//! controller never retries them. A [`CancelFlag`] is checked before every
//! step and every measurement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::clock::{is_timeout_expired, Clock, SystemClock};
use crate::error::{CalibrationError, Result};
use crate::graph::CalibrationGraph;
use crate::node::{CalibrationNode, NodeRegistry, Verdict};
use crate::outputs::CalibrationOutputs;
use crate::traits::{MeasurementExecutor, PlatformStore};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Shared cancellation switch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one controller lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub full_sweeps: usize,
    pub validation_probes: usize,
    /// `maintain` calls answered by `check_state` alone.
    pub skipped: usize,
    /// Recalibrations performed from inside `diagnose`.
    pub diagnose_repairs: usize,
}

pub struct CalibrationController<M, P, C = SystemClock>
where
    M: MeasurementExecutor,
    P: PlatformStore,
    C: Clock,
{
    graph: CalibrationGraph,
    nodes: NodeRegistry,
    executor: M,
    platform: P,
    clock: C,
    cancel: CancelFlag,
    stats: RunStats,
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

impl<M, P> CalibrationController<M, P, SystemClock>
where
    M: MeasurementExecutor,
    P: PlatformStore,
{
    pub fn new(
        nodes: NodeRegistry,
        graph: CalibrationGraph,
        executor: M,
        platform: P,
    ) -> Result<Self> {
        Self::with_clock(nodes, graph, executor, platform, SystemClock)
    }
}

impl<M, P, C> CalibrationController<M, P, C>
where
    M: MeasurementExecutor,
    P: PlatformStore,
    C: Clock,
{
    pub fn with_clock(
        nodes: NodeRegistry,
        graph: CalibrationGraph,
        executor: M,
        platform: P,
        clock: C,
    ) -> Result<Self> {
        graph.validate()?;
        if graph.is_empty() {
            warn!("[init] calibration graph has no nodes, nothing to maintain");
        }

        let missing: Vec<&String> = graph
            .nodes()
            .iter()
            .filter(|id| !nodes.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            warn!("[init] graph references nodes missing from the registry: {:?}", missing);
        }

        info!(
            "[init] Calibration controller ready: {} nodes, roots {:?}",
            graph.len(),
            graph.roots_with_no_dependents()
        );

        Ok(CalibrationController {
            graph,
            nodes,
            executor,
            platform,
            clock,
            cancel: CancelFlag::new(),
            stats: RunStats::default(),
        })
    }

    // ========================================================================
    // PUBLIC API
    // ========================================================================

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn graph(&self) -> &CalibrationGraph {
        &self.graph
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Result<&CalibrationNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| CalibrationError::UnknownNode(id.to_string()))
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Aggregated parameters and fidelities as of now. Also valid after a
    /// cancelled or failed run.
    pub fn outputs(&self) -> CalibrationOutputs {
        CalibrationOutputs::collect(&self.nodes)
    }

    /// Maintain every node that nothing depends on, then aggregate.
    pub fn run_automatic_calibration(&mut self) -> Result<CalibrationOutputs> {
        let roots = self.graph.roots_with_no_dependents();
        info!("[run] Automatic calibration over roots {:?}", roots);
        self.run_targets(roots.as_slice())
    }

    /// Maintain an explicit set of targets (and their ancestry), then aggregate.
    /// Unknown targets are rejected before anything is measured.
    pub fn run_targets<S: AsRef<str>>(&mut self, targets: &[S]) -> Result<CalibrationOutputs> {
        if let Some(unknown) = targets.iter().find(|t| !self.graph.contains(t.as_ref())) {
            return Err(CalibrationError::UnknownNode(unknown.as_ref().to_string()));
        }

        let before = self.stats;
        for target in targets {
            self.maintain(target.as_ref())?;
        }

        let outputs = self.outputs();
        info!(
            "[run] Done: {} sweeps, {} probes, {} skipped, {} repairs; {} params, {} fidelities",
            self.stats.full_sweeps - before.full_sweeps,
            self.stats.validation_probes - before.validation_probes,
            self.stats.skipped - before.skipped,
            self.stats.diagnose_repairs - before.diagnose_repairs,
            outputs.set_parameters.len(),
            outputs.fidelities.len()
        );
        Ok(outputs)
    }

    /// Post-order reconciliation of `id` and everything it depends on.
    pub fn maintain(&mut self, id: &str) -> Result<()> {
        self.ensure_running()?;
        self.node(id)?;

        let deps = self.graph.dependencies_of(id).to_vec();
        for dep in &deps {
            self.maintain(dep)?;
        }

        if self.check_state(id)? {
            debug!("[maintain] {}: state valid, skipping", id);
            self.stats.skipped += 1;
            return Ok(());
        }

        match self.check_data(id)? {
            Verdict::InSpec => {
                info!("[maintain] {}: in spec", id);
                return Ok(());
            }
            Verdict::OutOfSpec => {
                info!("[maintain] {}: out of spec, recalibrating", id);
            }
            Verdict::BadData => {
                info!("[maintain] {}: bad data, diagnosing {} dependencies", id, deps.len());
                for dep in &deps {
                    self.diagnose(dep)?;
                }
            }
        }

        self.calibrate(id)?;
        self.update_parameters(id)
    }

    /// Top-down search for the dependency that broke an ancestor.
    /// Returns true if `id` was recalibrated.
    pub fn diagnose(&mut self, id: &str) -> Result<bool> {
        self.ensure_running()?;

        match self.check_data(id)? {
            Verdict::InSpec => {
                debug!("[diagnose] {}: in spec, not the cause", id);
                return Ok(false);
            }
            Verdict::BadData => {
                let deps = self.graph.dependencies_of(id).to_vec();
                let mut repaired = Vec::with_capacity(deps.len());
                for dep in &deps {
                    repaired.push(self.diagnose(dep)?);
                }

                if !repaired.is_empty() && repaired.iter().all(|r| !r) {
                    info!(
                        "[diagnose] {}: bad data but no dependency needed repair, leaving as is",
                        id
                    );
                    return Ok(false);
                }
            }
            Verdict::OutOfSpec => {}
        }

        info!("[diagnose] {}: recalibrating", id);
        self.calibrate(id)?;
        self.update_parameters(id)?;
        self.stats.diagnose_repairs += 1;
        Ok(true)
    }

    /// Measurement-free staleness test.
    pub fn check_state(&self, id: &str) -> Result<bool> {
        let node = self.node(id)?;
        let Some(last) = node.previous_timestamp else {
            return Ok(false);
        };

        for dep in self.graph.dependencies_of(id) {
            match self.node(dep)?.previous_timestamp {
                Some(dep_ts) if dep_ts < last => {}
                _ => {
                    debug!("[check] {}: dependency {} is newer or uncalibrated", id, dep);
                    return Ok(false);
                }
            }
        }

        Ok(!is_timeout_expired(last, node.drift_timeout, self.clock.now()))
    }

    /// Run the validation probe and grade it against the trusted baseline.
    /// The probe result always becomes the next baseline.
    pub fn check_data(&mut self, id: &str) -> Result<Verdict> {
        self.ensure_running()?;
        self.node(id)?;

        let measurement = self
            .executor
            .run_validation_probe(id)
            .map_err(|source| CalibrationError::Measurement {
                node: id.to_string(),
                source,
            })?;
        self.stats.validation_probes += 1;

        let node = lookup_mut(&mut self.nodes, id)?;
        let score = node.score(measurement.output_parameters.as_ref());
        let verdict = match score {
            Some(score) => node.classify(score),
            None => Verdict::BadData,
        };

        node.output_parameters = measurement.output_parameters;
        std::mem::swap(&mut node.output_parameters, &mut node.previous_output_parameters);
        if verdict == Verdict::InSpec {
            node.previous_timestamp = Some(measurement.timestamp);
        }

        match score {
            Some(score) => info!(
                "[check] {}: {} (score {:.4}, thresholds {}/{}, {})",
                id,
                verdict,
                score,
                node.in_spec_threshold,
                node.bad_data_threshold,
                node.comparison_model.name()
            ),
            None => info!("[check] {}: {} (no baseline to compare against)", id, verdict),
        }

        Ok(verdict)
    }

    /// Full sweep. Refreshes the operating point, not the probe baseline.
    pub fn calibrate(&mut self, id: &str) -> Result<()> {
        self.ensure_running()?;
        self.node(id)?;

        info!("[calibrate] {}: running full sweep", id);
        let measurement = self
            .executor
            .run_full_sweep(id)
            .map_err(|source| CalibrationError::Measurement {
                node: id.to_string(),
                source,
            })?;
        self.stats.full_sweeps += 1;

        let timestamp = measurement.timestamp;
        lookup_mut(&mut self.nodes, id)?.record_sweep(measurement);
        info!("[calibrate] {}: done at {}", id, timestamp);
        Ok(())
    }

    /// Push the node's calibrated platform parameters and persist the platform.
    pub fn update_parameters(&mut self, id: &str) -> Result<()> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| CalibrationError::UnknownNode(id.to_string()))?;

        let params = match node.calibrated_parameters.as_ref() {
            Some(p) if !p.platform_parameters.is_empty() => &p.platform_parameters,
            _ => {
                debug!("[platform] {}: no platform parameters to publish", id);
                return Ok(());
            }
        };

        for p in params {
            debug!("[platform] {}: {}.{}[{:?}] = {}", id, p.alias, p.parameter, p.index, p.value);
            self.platform
                .set_parameter(&p.alias, &p.parameter, p.value, p.index)
                .map_err(|source| CalibrationError::Platform { source })?;
        }
        self.platform
            .save()
            .map_err(|source| CalibrationError::Platform { source })?;

        info!("[platform] {}: published {} parameters", id, params.len());
        Ok(())
    }

    // ========================================================================
    // UTILITY METHODS
    // ========================================================================

    fn ensure_running(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!("[run] cancellation requested, stopping");
            return Err(CalibrationError::Cancelled);
        }
        Ok(())
    }
}

fn lookup_mut<'a>(nodes: &'a mut NodeRegistry, id: &str) -> Result<&'a mut CalibrationNode> {
    nodes
        .get_mut(id)
        .ok_or_else(|| CalibrationError::UnknownNode(id.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
