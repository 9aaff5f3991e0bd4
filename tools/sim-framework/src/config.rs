//! Command-line configuration for the simulator.

use std::time::Duration;

use clap::Parser;

/// Run a sample framework against an automated in-process master.
#[derive(Debug, Clone, Parser)]
#[command(name = "skiff-sim")]
#[command(author, version, about, long_about = None)]
pub struct SimConfig {
    /// Number of tasks the framework runs to completion.
    #[arg(long, env = "SKIFF_SIM_TASKS", default_value_t = 10)]
    pub tasks: usize,

    /// CPUs requested per task.
    #[arg(long, default_value_t = 0.5)]
    pub task_cpus: f64,

    /// Memory (MiB) requested per task.
    #[arg(long, default_value_t = 128.0)]
    pub task_mem: f64,

    /// Number of simulated agents.
    #[arg(long, env = "SKIFF_SIM_AGENTS", default_value_t = 3)]
    pub agents: usize,

    /// CPUs per agent.
    #[arg(long, default_value_t = 2.0)]
    pub agent_cpus: f64,

    /// Memory (MiB) per agent.
    #[arg(long, default_value_t = 1024.0)]
    pub agent_mem: f64,

    /// How long each task runs before finishing.
    #[arg(long, default_value_t = 2)]
    pub task_runtime_secs: u64,

    /// Heartbeat interval announced by the master.
    #[arg(long, default_value_t = 1.0)]
    pub heartbeat_secs: f64,

    /// Break the link once after this many seconds to exercise failover.
    #[arg(long)]
    pub drop_link_after_secs: Option<u64>,

    /// Every Nth task fails on its first run and is relaunched.
    #[arg(long, default_value_t = 0)]
    pub fail_every: usize,

    /// Log output format (pretty or json).
    #[arg(long, env = "SKIFF_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl SimConfig {
    pub fn task_runtime(&self) -> Duration {
        Duration::from_secs(self.task_runtime_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_secs.max(0.05))
    }

    pub fn drop_link_after(&self) -> Option<Duration> {
        self.drop_link_after_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.task_cpus <= 0.0 || self.task_mem <= 0.0 {
            anyhow::bail!("task resources must be positive");
        }
        if self.task_cpus > self.agent_cpus || self.task_mem > self.agent_mem {
            anyhow::bail!("a single task does not fit on an agent");
        }
        if self.agents == 0 {
            anyhow::bail!("at least one agent is required");
        }
        if !(self.heartbeat_secs > 0.0 && self.heartbeat_secs <= 3600.0) {
            anyhow::bail!("heartbeat interval must be between 0 and 3600 seconds");
        }
        Ok(())
    }
}
