//! Cluster environments -- how rank, world size and the rendezvous address
//! are discovered under each job scheduler.
//!
//! Detection order is fixed: SLURM, TorchElastic, Kubeflow, LSF, MPI. The
//! first probe that matches wins; otherwise the run falls back to the local
//! [`EnvironmentKind::Lightning`] environment.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::system::Platform;

const DEFAULT_MAIN_ADDRESS: &str = "127.0.0.1";
const DEFAULT_MAIN_PORT: u16 = 29500;

/// Process-topology discovery for one scheduler context.
pub trait ClusterEnvironment: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// True when the scheduler (not the strategy's launcher) starts the
    /// worker processes.
    fn creates_processes_externally(&self) -> bool;

    fn main_address(&self) -> &str;

    fn main_port(&self) -> u16;

    /// World size if the scheduler dictates it.
    fn world_size(&self) -> Option<usize>;

    /// Global rank if the scheduler dictates it.
    fn global_rank(&self) -> Option<usize>;

    fn local_rank(&self) -> usize;

    fn node_rank(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnvironmentKind {
    Slurm,
    TorchElastic,
    Kubeflow,
    Lsf,
    Mpi,
    Lightning,
}

impl EnvironmentKind {
    /// Probe order used by [`detect`].
    pub const PROBE_ORDER: [EnvironmentKind; 5] = [
        EnvironmentKind::Slurm,
        EnvironmentKind::TorchElastic,
        EnvironmentKind::Kubeflow,
        EnvironmentKind::Lsf,
        EnvironmentKind::Mpi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EnvironmentKind::Slurm => "SLURMEnvironment",
            EnvironmentKind::TorchElastic => "TorchElasticEnvironment",
            EnvironmentKind::Kubeflow => "KubeflowEnvironment",
            EnvironmentKind::Lsf => "LSFEnvironment",
            EnvironmentKind::Mpi => "MPIEnvironment",
            EnvironmentKind::Lightning => "LightningEnvironment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "slurm" => Some(EnvironmentKind::Slurm),
            "torchelastic" | "torch_elastic" => Some(EnvironmentKind::TorchElastic),
            "kubeflow" => Some(EnvironmentKind::Kubeflow),
            "lsf" => Some(EnvironmentKind::Lsf),
            "mpi" => Some(EnvironmentKind::Mpi),
            "lightning" | "local" => Some(EnvironmentKind::Lightning),
            _ => None,
        }
    }

    /// Stateless probe: does the current process run under this scheduler?
    pub fn detect(&self, platform: &dyn Platform) -> bool {
        match self {
            EnvironmentKind::Slurm => {
                platform.env_is_set("SLURM_NTASKS")
                    && !matches!(
                        platform.env_var("SLURM_JOB_NAME").as_deref(),
                        Some("bash") | Some("interactive")
                    )
            }
            EnvironmentKind::TorchElastic => ["RANK", "GROUP_RANK", "LOCAL_RANK", "LOCAL_WORLD_SIZE"]
                .iter()
                .all(|k| platform.env_is_set(k)),
            EnvironmentKind::Kubeflow => {
                platform.env_is_set("KUBERNETES_PORT")
                    && ["MASTER_ADDR", "MASTER_PORT", "WORLD_SIZE", "RANK"]
                        .iter()
                        .all(|k| platform.env_is_set(k))
                    && !["LOCAL_RANK", "GROUP_RANK"].iter().any(|k| platform.env_is_set(k))
            }
            EnvironmentKind::Lsf => [
                "LSB_JOBID",
                "LSB_DJOB_RANKFILE",
                "JSM_NAMESPACE_LOCAL_RANK",
                "JSM_NAMESPACE_SIZE",
            ]
            .iter()
            .all(|k| platform.env_is_set(k)),
            EnvironmentKind::Mpi => mpi_world_size(platform).is_some_and(|n| n > 1),
            EnvironmentKind::Lightning => true,
        }
    }

    /// Snapshot the scheduler's variables into an environment.
    pub fn instantiate(&self, platform: &dyn Platform) -> Arc<dyn ClusterEnvironment> {
        Arc::new(SchedulerEnvironment::from_platform(*self, platform))
    }
}

/// Run the probes in order and instantiate the first match, or the local
/// default.
pub fn detect(platform: &dyn Platform) -> Arc<dyn ClusterEnvironment> {
    let kind = EnvironmentKind::PROBE_ORDER
        .into_iter()
        .find(|kind| kind.detect(platform))
        .unwrap_or(EnvironmentKind::Lightning);
    debug!(environment = kind.name(), "detected cluster environment");
    kind.instantiate(platform)
}

/// Environment populated from a scheduler's variables at detection time.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerEnvironment {
    pub kind: EnvironmentKind,
    pub main_address: String,
    pub main_port: u16,
    pub world_size: Option<usize>,
    pub global_rank: Option<usize>,
    pub local_rank: usize,
    pub node_rank: usize,
    pub external: bool,
}

impl SchedulerEnvironment {
    pub fn from_platform(kind: EnvironmentKind, p: &dyn Platform) -> Self {
        let master_address = || p.env_var("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MAIN_ADDRESS.to_string());
        // out-of-range ports fall back rather than wrap
        let env_port = || p.env_usize("MASTER_PORT").and_then(|v| u16::try_from(v).ok());
        let master_port = || env_port().unwrap_or(DEFAULT_MAIN_PORT);
        match kind {
            EnvironmentKind::Slurm => Self {
                kind,
                main_address: p
                    .env_var("SLURM_NODELIST")
                    .map(|list| resolve_root_node_address(&list))
                    .unwrap_or_else(|| DEFAULT_MAIN_ADDRESS.to_string()),
                main_port: env_port().unwrap_or_else(|| job_port(p.env_var("SLURM_JOB_ID").as_deref())),
                world_size: p.env_usize("SLURM_NTASKS"),
                global_rank: p.env_usize("SLURM_PROCID"),
                local_rank: p.env_usize("SLURM_LOCALID").unwrap_or(0),
                node_rank: p.env_usize("SLURM_NODEID").unwrap_or(0),
                external: true,
            },
            EnvironmentKind::TorchElastic => Self {
                kind,
                main_address: master_address(),
                main_port: master_port(),
                world_size: p.env_usize("WORLD_SIZE"),
                global_rank: p.env_usize("RANK"),
                local_rank: p.env_usize("LOCAL_RANK").unwrap_or(0),
                node_rank: p.env_usize("GROUP_RANK").unwrap_or(0),
                external: true,
            },
            EnvironmentKind::Kubeflow => Self {
                kind,
                main_address: master_address(),
                main_port: master_port(),
                world_size: p.env_usize("WORLD_SIZE"),
                global_rank: p.env_usize("RANK"),
                local_rank: 0,
                // one process per pod, so the pod rank is the node rank
                node_rank: p.env_usize("RANK").unwrap_or(0),
                external: true,
            },
            EnvironmentKind::Lsf => Self {
                kind,
                main_address: p
                    .env_var("LSB_MCPU_HOSTS")
                    .and_then(|hosts| lsf_main_host(&hosts))
                    .unwrap_or_else(|| DEFAULT_MAIN_ADDRESS.to_string()),
                main_port: job_port(p.env_var("LSB_JOBID").as_deref()),
                world_size: p.env_usize("JSM_NAMESPACE_SIZE"),
                global_rank: p.env_usize("JSM_NAMESPACE_RANK"),
                local_rank: p.env_usize("JSM_NAMESPACE_LOCAL_RANK").unwrap_or(0),
                node_rank: 0,
                external: true,
            },
            EnvironmentKind::Mpi => {
                let local_rank = p
                    .env_usize("OMPI_COMM_WORLD_LOCAL_RANK")
                    .or_else(|| p.env_usize("MPI_LOCALRANKID"))
                    .unwrap_or(0);
                let global_rank = p.env_usize("OMPI_COMM_WORLD_RANK").or_else(|| p.env_usize("PMI_RANK"));
                let local_size = p.env_usize("OMPI_COMM_WORLD_LOCAL_SIZE").filter(|&n| n > 0);
                Self {
                    kind,
                    main_address: master_address(),
                    main_port: master_port(),
                    world_size: mpi_world_size(p),
                    global_rank,
                    local_rank,
                    node_rank: match (global_rank, local_size) {
                        (Some(rank), Some(size)) => rank / size,
                        _ => 0,
                    },
                    external: true,
                }
            }
            EnvironmentKind::Lightning => Self {
                kind,
                main_address: master_address(),
                main_port: master_port(),
                world_size: p.env_usize("WORLD_SIZE"),
                global_rank: None,
                local_rank: p.env_usize("LOCAL_RANK").unwrap_or(0),
                node_rank: p
                    .env_usize("NODE_RANK")
                    .or_else(|| p.env_usize("GROUP_RANK"))
                    .unwrap_or(0),
                // processes were already launched if LOCAL_RANK is set
                external: p.env_is_set("LOCAL_RANK"),
            },
        }
    }
}

impl ClusterEnvironment for SchedulerEnvironment {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn creates_processes_externally(&self) -> bool {
        self.external
    }

    fn main_address(&self) -> &str {
        &self.main_address
    }

    fn main_port(&self) -> u16 {
        self.main_port
    }

    fn world_size(&self) -> Option<usize> {
        self.world_size
    }

    fn global_rank(&self) -> Option<usize> {
        self.global_rank
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn node_rank(&self) -> usize {
        self.node_rank
    }
}

fn mpi_world_size(p: &dyn Platform) -> Option<usize> {
    p.env_usize("OMPI_COMM_WORLD_SIZE").or_else(|| p.env_usize("PMI_SIZE"))
}

/// Port derived from the job id so concurrent jobs on a node don't collide.
fn job_port(job_id: Option<&str>) -> u16 {
    let Some(job_id) = job_id else {
        return DEFAULT_MAIN_PORT;
    };
    let digits: String = job_id.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail = &digits[digits.len().saturating_sub(4)..];
    tail.parse::<u16>().map(|n| 10000 + n).unwrap_or(DEFAULT_MAIN_PORT)
}

/// First hostname of a SLURM node list such as `node[012-014],gpu7`.
pub fn resolve_root_node_address(nodes: &str) -> String {
    let first = nodes.split(',').next().unwrap_or("").trim();
    match first.split_once('[') {
        Some((prefix, range)) => {
            let first_id = range
                .trim_end_matches(']')
                .split(|c| c == '-' || c == ',')
                .next()
                .unwrap_or("");
            format!("{}{}", prefix, first_id)
        }
        None => first.to_string(),
    }
}

/// `LSB_MCPU_HOSTS` is `batchhost n host1 n host2 n ...`; the first compute
/// host is the rendezvous node.
fn lsf_main_host(hosts: &str) -> Option<String> {
    hosts.split_whitespace().nth(2).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    #[test]
    fn test_nothing_set_is_lightning() {
        let env = detect(&StaticPlatform::cpu_only());
        assert_eq!(env.name(), "LightningEnvironment");
        assert!(!env.creates_processes_externally());
        assert_eq!(env.main_address(), "127.0.0.1");
        assert_eq!(env.main_port(), 29500);
    }

    #[test]
    fn test_slurm_detection_and_fields() {
        let p = StaticPlatform::cpu_only()
            .with_env("SLURM_NTASKS", "8")
            .with_env("SLURM_JOB_NAME", "train")
            .with_env("SLURM_JOB_ID", "123456")
            .with_env("SLURM_PROCID", "5")
            .with_env("SLURM_LOCALID", "1")
            .with_env("SLURM_NODEID", "2")
            .with_env("SLURM_NODELIST", "gpu[004-007]");
        let env = detect(&p);
        assert_eq!(env.name(), "SLURMEnvironment");
        assert_eq!(env.world_size(), Some(8));
        assert_eq!(env.global_rank(), Some(5));
        assert_eq!(env.local_rank(), 1);
        assert_eq!(env.node_rank(), 2);
        assert_eq!(env.main_address(), "gpu004");
        assert_eq!(env.main_port(), 13456);
    }

    #[test]
    fn test_slurm_interactive_is_ignored() {
        let p = StaticPlatform::cpu_only()
            .with_env("SLURM_NTASKS", "1")
            .with_env("SLURM_JOB_NAME", "bash");
        assert!(!EnvironmentKind::Slurm.detect(&p));
    }

    #[test]
    fn test_slurm_wins_over_torchelastic() {
        let p = StaticPlatform::cpu_only()
            .with_env("SLURM_NTASKS", "2")
            .with_env("RANK", "0")
            .with_env("GROUP_RANK", "0")
            .with_env("LOCAL_RANK", "0")
            .with_env("LOCAL_WORLD_SIZE", "2");
        assert_eq!(detect(&p).name(), "SLURMEnvironment");
    }

    #[test]
    fn test_kubeflow_excludes_torchelastic_vars() {
        let base = StaticPlatform::cpu_only()
            .with_env("KUBERNETES_PORT", "tcp://10.0.0.1:443")
            .with_env("MASTER_ADDR", "trainer-0")
            .with_env("MASTER_PORT", "23456")
            .with_env("WORLD_SIZE", "4")
            .with_env("RANK", "3");
        let env = detect(&base);
        assert_eq!(env.name(), "KubeflowEnvironment");
        assert_eq!(env.node_rank(), 3);
        assert_eq!(env.main_port(), 23456);

        let elastic = base.with_env("LOCAL_RANK", "0");
        assert!(!EnvironmentKind::Kubeflow.detect(&elastic));
    }

    #[test]
    fn test_out_of_range_master_port_uses_default() {
        let p = StaticPlatform::cpu_only().with_env("MASTER_PORT", "70000");
        let env = SchedulerEnvironment::from_platform(EnvironmentKind::Lightning, &p);
        assert_eq!(env.main_port(), DEFAULT_MAIN_PORT);

        let slurm = StaticPlatform::cpu_only()
            .with_env("SLURM_NTASKS", "2")
            .with_env("SLURM_JOB_NAME", "train")
            .with_env("SLURM_JOB_ID", "123456")
            .with_env("MASTER_PORT", "70000");
        let env = SchedulerEnvironment::from_platform(EnvironmentKind::Slurm, &slurm);
        assert_eq!(env.main_port(), job_port(Some("123456")));
    }

    #[test]
    fn test_mpi_requires_more_than_one_process() {
        let single = StaticPlatform::cpu_only().with_env("OMPI_COMM_WORLD_SIZE", "1");
        assert!(!EnvironmentKind::Mpi.detect(&single));
        let multi = StaticPlatform::cpu_only()
            .with_env("OMPI_COMM_WORLD_SIZE", "4")
            .with_env("OMPI_COMM_WORLD_RANK", "3")
            .with_env("OMPI_COMM_WORLD_LOCAL_RANK", "1")
            .with_env("OMPI_COMM_WORLD_LOCAL_SIZE", "2");
        let env = detect(&multi);
        assert_eq!(env.name(), "MPIEnvironment");
        assert_eq!(env.node_rank(), 1);
    }

    #[test]
    fn test_lsf_main_host() {
        let p = StaticPlatform::cpu_only()
            .with_env("LSB_JOBID", "77")
            .with_env("LSB_DJOB_RANKFILE", "/tmp/rankfile")
            .with_env("JSM_NAMESPACE_LOCAL_RANK", "0")
            .with_env("JSM_NAMESPACE_SIZE", "6")
            .with_env("LSB_MCPU_HOSTS", "batch1 1 node1 42 node2 42");
        let env = detect(&p);
        assert_eq!(env.name(), "LSFEnvironment");
        assert_eq!(env.main_address(), "node1");
        assert_eq!(env.world_size(), Some(6));
        assert_eq!(env.main_port(), 10077);
    }

    #[test]
    fn test_root_node_address() {
        assert_eq!(resolve_root_node_address("node1,node2"), "node1");
        assert_eq!(resolve_root_node_address("host[5-9]"), "host5");
        assert_eq!(resolve_root_node_address("a[1,3,5]"), "a1");
    }
}
