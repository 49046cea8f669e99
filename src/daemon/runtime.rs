//! Service wiring and lifecycle.
//!
//! `Runtime::start` builds every service from the config and starts both
//! background loops; `Runtime::shutdown` stops them in reverse order. No
//! service is a global: everything is reachable from the `Runtime` value.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::control::{ControlOutcome, GatewayControl, TmuxControl, apply_action};
use crate::core::command::{CommandRunner, SystemRunner};
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::aggregator::{LiveSources, SourceTtls, StatusAggregator, StatusSources};
use crate::daemon::broadcast::{BroadcastLoop, Subscription};
use crate::monitor::process::{
    CommandLineMatcher, ProcessInspector, ProcessSampler, SnapshotCell, SysinfoInspector,
};
use crate::monitor::reachability::ReachabilityPoller;

pub struct Runtime {
    config: Config,
    sampler: ProcessSampler,
    aggregator: Arc<StatusAggregator>,
    broadcast: BroadcastLoop,
    control: Arc<dyn GatewayControl>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("sampler", &self.sampler)
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Start with the OS process inspector and real subprocesses.
    ///
    /// # Errors
    /// `ThreadSpawn` if either background loop cannot start.
    pub fn start(config: Config) -> Result<Self> {
        Self::start_with(config, SysinfoInspector::new(), Arc::new(SystemRunner))
    }

    /// Start with injected process inspection and command execution.
    ///
    /// # Errors
    /// `ThreadSpawn` if either background loop cannot start.
    pub fn start_with<I>(config: Config, inspector: I, runner: Arc<dyn CommandRunner>) -> Result<Self>
    where
        I: ProcessInspector + 'static,
    {
        let matcher = CommandLineMatcher::new(&config.gateway.process_tokens);
        let sampler = ProcessSampler::start(inspector, matcher, config.sampler.interval())?;

        let control: Arc<dyn GatewayControl> = Arc::new(TmuxControl::new(
            Arc::clone(&runner),
            &config.gateway,
            &config.control,
        ));
        let sources = LiveSources::new(
            &config,
            sampler.cell(),
            ReachabilityPoller::new(runner, &config.reachability),
            Some(Arc::clone(&control)),
        );
        let aggregator = Arc::new(StatusAggregator::new(
            Arc::new(sources) as Arc<dyn StatusSources>,
            SourceTtls::from(&config.cache),
        ));
        let broadcast = BroadcastLoop::start(Arc::clone(&aggregator), &config.broadcast)?;

        info!(
            sessions = %config.paths.sessions_dir().display(),
            jobs = %config.paths.jobs_file().display(),
            "monitor runtime started"
        );
        Ok(Self {
            config,
            sampler,
            aggregator,
            broadcast,
            control,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn aggregator(&self) -> Arc<StatusAggregator> {
        Arc::clone(&self.aggregator)
    }

    #[must_use]
    pub fn control(&self) -> Arc<dyn GatewayControl> {
        Arc::clone(&self.control)
    }

    #[must_use]
    pub fn process_cell(&self) -> Arc<SnapshotCell> {
        self.sampler.cell()
    }

    /// Subscribe to the broadcast; the current snapshot arrives immediately.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.broadcast.subscribe()
    }

    /// Detach a subscriber from the broadcast.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.broadcast.unsubscribe(subscription)
    }

    /// Run a start/stop/restart request and drop the cached gateway liveness
    /// so the next snapshot shows its effect.
    pub fn apply_control(&self, raw_action: &str) -> ControlOutcome {
        let outcome = apply_action(self.control.as_ref(), raw_action);
        self.aggregator.invalidate_gateway();
        info!(action = raw_action, success = outcome.success, "control action applied");
        outcome
    }

    /// Block until the sampler has published `ticks` snapshots (CPU readings
    /// need two) or `timeout` elapses.
    pub fn wait_for_samples(&self, ticks: u64, timeout: Duration) -> bool {
        self.sampler.cell().wait_for_generation(ticks, timeout)
    }

    /// Stop the broadcast loop, then the sampler.
    pub fn shutdown(self) {
        let Self {
            sampler, broadcast, ..
        } = self;
        broadcast.stop();
        sampler.stop();
        info!("monitor runtime stopped");
    }
}
