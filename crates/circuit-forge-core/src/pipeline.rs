//! The build pipeline: four stages in a fixed order, one build per slug.
//!
//! A slug is claimed twice. An in-process set refuses a second build from the
//! same [`Pipeline`], and an advisory lock on
//! `{circuit_output_root}/.locks/{slug}.lock` refuses one from any other
//! pipeline or process on the same output tree.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactLayout;
use crate::config::ForgeConfig;
use crate::error::{ForgeError, Result};
use crate::identity::{BuildRequest, CircuitIdentity};
use crate::stage::{self, Stage, StageContext, StageStatus};

/// Outcome of one stage within a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    /// Wall time spent in the stage, including the cache check.
    pub elapsed: Duration,
}

/// Result of a build in which every stage either ran or was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub identity: CircuitIdentity,
    pub stages: Vec<StageReport>,
}

impl BuildReport {
    /// Stages that did work in this build.
    pub fn ran(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages
            .iter()
            .filter(|r| r.status == StageStatus::Ran)
            .map(|r| r.stage)
    }

    /// True when the build was a full cache hit.
    pub fn is_noop(&self) -> bool {
        self.ran().next().is_none()
    }
}

/// Drives the four stages for one circuit at a time per slug.
///
/// Cloning is cheap and clones share the in-flight set and the cancellation
/// token, so one `Pipeline` can be handed to many tasks.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<ForgeConfig>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: ForgeConfig) -> Self {
        Self {
            config: Arc::new(config),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Cancelling this token kills any running tool and fails its stage.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_building(&self, slug: &str) -> bool {
        self.in_flight.lock().contains(slug)
    }

    /// Run compile → proving key → verification key → publish for one circuit.
    ///
    /// Stops at the first failing stage and leaves whatever it produced on
    /// disk; a later non-forced build resumes from the first missing artifact.
    /// A second request for a slug that is already building is refused with
    /// [`ForgeError::BuildInProgress`], forced or not.
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildReport> {
        let identity = &request.identity;
        let _claim = SlugClaim::acquire(
            &self.in_flight,
            &self.config.circuit_output_root,
            identity.slug(),
        )?;

        let layout = ArtifactLayout::new(&self.config, identity);
        let cancel = self.cancel.child_token();
        let ctx = StageContext {
            config: &self.config,
            identity,
            layout: &layout,
            force: request.force,
            cancel: &cancel,
        };

        tracing::info!("building {identity} (force: {})", request.force);
        let mut stages = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let started = Instant::now();
            let status = stage::run(stage, &ctx).await.map_err(|source| {
                tracing::error!("{identity}: stage {stage} failed: {source}");
                ForgeError::Stage { stage, source }
            })?;
            stages.push(StageReport {
                stage,
                status,
                elapsed: started.elapsed(),
            });
        }

        tracing::info!("built {identity}");
        Ok(BuildReport {
            identity: identity.clone(),
            stages,
        })
    }
}

/// Directory under the circuit output root holding per-slug lock files.
const LOCK_DIR: &str = ".locks";

/// Exclusive right to build one slug, released on drop.
struct SlugClaim {
    slug: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
    lock: Option<File>,
}

impl SlugClaim {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<String>>>,
        output_root: &Path,
        slug: &str,
    ) -> Result<Self> {
        if !in_flight.lock().insert(slug.to_string()) {
            return Err(ForgeError::BuildInProgress {
                slug: slug.to_string(),
            });
        }
        // From here on, dropping the claim releases the in-process slot.
        let mut claim = Self {
            slug: slug.to_string(),
            in_flight: Arc::clone(in_flight),
            lock: None,
        };
        claim.lock = Some(lock_slug(output_root, slug)?);
        Ok(claim)
    }
}

impl Drop for SlugClaim {
    fn drop(&mut self) {
        // Unlock before freeing the in-process slot.
        drop(self.lock.take());
        self.in_flight.lock().remove(&self.slug);
    }
}

/// Take the advisory lock for `slug` without blocking.
///
/// Lock files are never removed; unlinking one could let two builders lock
/// different inodes under the same name.
fn lock_slug(output_root: &Path, slug: &str) -> Result<File> {
    let dir = output_root.join(LOCK_DIR);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{slug}.lock"));
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            tracing::debug!("{} is held by another builder", path.display());
            Err(ForgeError::BuildInProgress {
                slug: slug.to_string(),
            })
        }
        Err(e) => Err(ForgeError::Io(e)),
    }
}
