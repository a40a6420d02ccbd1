// SPDX-License-Identifier: GPL-3.0-only

//! Reconstruction node lifecycle
//!
//! ```text
//!            start(true)                 engine built
//!   Idle ─────────────────▶ SourceResolved ─────────────▶ Running
//!    ▲                           │                          │
//!    │        no source          │          start(false)    ▼
//!    ├───────────────────────────┘                    StopRequested
//!    │                                                      │
//!    └──────────── run loop exits (stop or exhausted) ──────┘
//! ```
//!
//! `start(true)` blocks the calling thread for the whole session.
//! `start(false)` only raises the exit flag; the state channel reports when
//! the loop has actually finished. The engine survives the session so a
//! mesh can still be published after the run ends.

pub mod control;
pub mod session;

pub use control::{ControlClient, ControlRequest, ControlResponse, ControlServer};
pub use session::{ExitReason, RunSession, RunSummary, SessionHandle};

use crate::backends::source::{BridgeTopics, ImageSize, SourceRequest, SourceResolver};
use crate::config::NodeConfig;
use crate::constants::timing::IDLE_POLL_INTERVAL;
use crate::engine::{EngineFactory, SharedEngine, lock_engine, share};
use crate::errors::{NodeError, NodeResult, SourceError};
use crate::pipelines::mesh::{
    PointCloud, PolygonMesh, Triangle, to_external_mesh, to_point_cloud, to_polygon_mesh,
};
use crate::pipelines::scene::{ExportedFiles, SceneExport, export_scene_sync};
use crate::transport::{Header, MeshMessage, Message, PointCloudMessage, Transport};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    /// A start request owns the node and its sources are being set up
    SourceResolved,
    Running,
    StopRequested,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SourceResolved => "source-resolved",
            Self::Running => "running",
            Self::StopRequested => "stop-requested",
        };
        f.write_str(name)
    }
}

/// Snapshot returned by [`ReconstructionNode::status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub state: LifecycleState,
    pub engine_present: bool,
    pub session_id: Option<Uuid>,
    pub frames_processed: Option<u64>,
    pub last_run: Option<RunSummary>,
}

/// Outcome of one publish request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub triangles: usize,
    pub files: Option<ExportedFiles>,
    pub point_cloud_published: bool,
    pub mesh_published: bool,
}

#[derive(Default)]
struct Inner {
    engine: Option<SharedEngine>,
    session: Option<SessionHandle>,
    last_run: Option<RunSummary>,
}

pub struct ReconstructionNode {
    config: NodeConfig,
    request: SourceRequest,
    factory: Arc<dyn EngineFactory>,
    resolver: SourceResolver,
    transport: Option<Arc<dyn Transport>>,
    inner: Mutex<Inner>,
    state: watch::Sender<LifecycleState>,
}

impl ReconstructionNode {
    pub fn new(
        config: NodeConfig,
        request: SourceRequest,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            config,
            request,
            factory,
            resolver: SourceResolver::default(),
            transport: None,
            inner: Mutex::new(Inner::default()),
            state,
        }
    }

    /// Replace the live-device resolver. Call before [`Self::with_transport`].
    pub fn with_resolver(mut self, resolver: SourceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Publish outputs on `transport` and bridge from it when no local source exists
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        let topics = BridgeTopics::from_config(&self.config);
        self.resolver =
            std::mem::take(&mut self.resolver).with_bridge(Arc::clone(&transport), topics);
        self.transport = Some(transport);
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver observing every lifecycle transition
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Resolve once the node is back in `Idle`
    pub async fn wait_finished(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as self, so this only ends on Idle
        let _ = rx.wait_for(|s| *s == LifecycleState::Idle).await;
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Lifecycle transition");
        }
    }

    pub fn status(&self) -> NodeStatus {
        let (engine, session_id, last_run) = {
            let inner = self.inner();
            (
                inner.engine.clone(),
                inner.session.as_ref().map(SessionHandle::id),
                inner.last_run,
            )
        };
        NodeStatus {
            state: self.state(),
            engine_present: engine.is_some(),
            session_id,
            frames_processed: engine.map(|e| lock_engine(&e).frames_processed()),
            last_run,
        }
    }

    /// `true` runs a session on the calling thread until it ends and
    /// returns its summary. `false` asks a running session to stop and
    /// returns at once; while idle it does nothing.
    pub fn start(&self, enable: bool) -> NodeResult<Option<RunSummary>> {
        if enable {
            self.run_session().map(Some)
        } else {
            self.request_stop();
            Ok(None)
        }
    }

    fn request_stop(&self) {
        let inner = self.inner();
        match self.state() {
            LifecycleState::Idle => debug!("Stop requested while idle, ignoring"),
            LifecycleState::StopRequested => debug!("Stop already requested"),
            LifecycleState::SourceResolved | LifecycleState::Running => {
                if let Some(session) = &inner.session {
                    session.request_exit();
                    info!(session = %session.id(), "Stop requested");
                } else {
                    info!("Stop requested before the session started");
                }
                self.set_state(LifecycleState::StopRequested);
            }
        }
    }

    fn stop_pending(&self) -> bool {
        self.state() == LifecycleState::StopRequested
    }

    fn run_session(&self) -> NodeResult<RunSummary> {
        {
            let _inner = self.inner();
            if self.state() != LifecycleState::Idle {
                warn!(state = %self.state(), "Start rejected, node is busy");
                return Err(NodeError::AlreadyRunning);
            }
            self.set_state(LifecycleState::SourceResolved);
        }

        let result = self.resolve_and_run();

        let mut inner = self.inner();
        inner.session = None;
        if let Ok(summary) = &result {
            inner.last_run = Some(*summary);
        }
        self.set_state(LifecycleState::Idle);
        result
    }

    fn resolve_and_run(&self) -> NodeResult<RunSummary> {
        let Some(sources) = self.resolver.resolve(&self.request) else {
            error!("Failed to open any image stream");
            return Err(SourceError::NoSourceFound.into());
        };

        let mut session = RunSession::new(sources);
        let handle = session.handle();
        {
            let mut inner = self.inner();
            if self.stop_pending() {
                handle.request_exit();
            }
            inner.session = Some(handle.clone());
        }

        let Some((rgb_size, depth_size)) = wait_for_frame_size(&session, &handle) else {
            return Ok(RunSummary {
                frames_processed: 0,
                idle_polls: 0,
                errors: 0,
                exit_reason: ExitReason::StopRequested,
            });
        };

        let engine = self.factory.construct(
            &self.config.engine_settings(),
            session.image_source().calibration(),
            rgb_size,
            depth_size,
        )?;
        let engine = share(engine);
        session.bind_engine(&engine);

        {
            let mut inner = self.inner();
            inner.engine = Some(engine);
            if !self.stop_pending() {
                self.set_state(LifecycleState::Running);
            }
        }
        info!(
            session = %session.id(),
            source = %session.descriptor(),
            rgb = %rgb_size,
            depth = %depth_size,
            "Reconstruction started"
        );

        Ok(session.run())
    }

    /// Mesh the scene and export/publish it per configuration
    pub fn publish_mesh(&self) -> NodeResult<PublishReport> {
        let Some(engine) = self.inner().engine.clone() else {
            warn!("Publish requested with no reconstruction");
            return Err(NodeError::NoActiveReconstruction);
        };

        let save_files = self.config.save_cloud_to_file_system;
        let want_polygons = save_files || self.config.publish_mesh;
        let want_cloud = self.config.publish_point_cloud;

        // Convert under the engine lock, export after releasing it
        let (triangle_count, triangles, polygon_mesh, cloud) = {
            let mut engine = lock_engine(&engine);
            engine.mesh_scene()?;
            let host = engine.mesh().materialize()?;
            if host.is_empty() {
                warn!("Mesh has no triangles");
            }

            let polygon_mesh = if want_polygons {
                Some(to_polygon_mesh(host.triangles())?)
            } else {
                None
            };
            let cloud: Option<PointCloud> = match (&polygon_mesh, want_cloud) {
                (_, false) => None,
                (Some(mesh), true) => Some(mesh.cloud.clone()),
                (None, true) => Some(to_point_cloud(host.triangles())),
            };
            let triangles: Vec<Triangle> = if save_files {
                host.triangles().to_vec()
            } else {
                Vec::new()
            };
            (host.len(), triangles, polygon_mesh, cloud)
        };

        let files = match (&polygon_mesh, save_files) {
            (Some(mesh), true) => Some(export_scene_sync(
                &triangles,
                mesh,
                &SceneExport {
                    output_dir: self.config.output_dir.clone(),
                    include_las: self.config.save_point_cloud_las,
                },
            )?),
            _ => None,
        };

        let point_cloud_published = match &cloud {
            Some(cloud) => self.publish_point_cloud(cloud)?,
            None => false,
        };
        let mesh_published = match (&polygon_mesh, self.config.publish_mesh) {
            (Some(mesh), true) => self.publish_polygon_mesh(mesh)?,
            _ => false,
        };

        info!(
            triangles = triangle_count,
            files = files.is_some(),
            point_cloud_published,
            mesh_published,
            "Mesh published"
        );
        Ok(PublishReport {
            triangles: triangle_count,
            files,
            point_cloud_published,
            mesh_published,
        })
    }

    fn transport_for(&self, what: &str) -> Option<&Arc<dyn Transport>> {
        if self.transport.is_none() {
            warn!(output = what, "No transport attached, not publishing");
        }
        self.transport.as_ref()
    }

    fn publish_point_cloud(&self, cloud: &PointCloud) -> NodeResult<bool> {
        let Some(transport) = self.transport_for("point cloud") else {
            return Ok(false);
        };
        let message = PointCloudMessage::new(Header::now(&self.config.camera_frame_id), cloud);
        transport.publish(&self.config.scene_point_cloud, Message::PointCloud(message))?;
        debug!(topic = %self.config.scene_point_cloud, points = cloud.len(), "Point cloud sent");
        Ok(true)
    }

    fn publish_polygon_mesh(&self, mesh: &PolygonMesh) -> NodeResult<bool> {
        let Some(transport) = self.transport_for("mesh") else {
            return Ok(false);
        };
        let external = to_external_mesh(mesh);
        let message = MeshMessage::new(Header::now(&self.config.camera_frame_id), &external);
        transport.publish(&self.config.scene_mesh, Message::Mesh(message))?;
        debug!(
            topic = %self.config.scene_mesh,
            triangles = external.triangles.len(),
            "Mesh sent"
        );
        Ok(true)
    }
}

/// Bridged sources learn their sizes from the first frames; wait for them.
/// `None` if an exit is requested first.
fn wait_for_frame_size(
    session: &RunSession,
    handle: &SessionHandle,
) -> Option<(ImageSize, ImageSize)> {
    let source = session.image_source();
    let mut logged = false;
    loop {
        if handle.exit_requested() {
            return None;
        }
        let (rgb, depth) = (source.rgb_image_size(), source.depth_image_size());
        if depth.is_valid() {
            return Some((rgb, depth));
        }
        if !logged {
            info!(source = %session.descriptor(), "Waiting for the first depth frame");
            logged = true;
        }
        std::thread::sleep(IDLE_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DepthGridFactory;

    fn idle_node() -> ReconstructionNode {
        ReconstructionNode::new(
            NodeConfig::default(),
            SourceRequest::default(),
            Arc::new(DepthGridFactory),
        )
        .with_resolver(SourceResolver::new(Vec::new()))
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let node = idle_node();
        assert_eq!(node.start(false).unwrap(), None);
        assert_eq!(node.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_publish_without_engine() {
        let node = idle_node();
        assert!(matches!(
            node.publish_mesh(),
            Err(NodeError::NoActiveReconstruction)
        ));
    }

    #[test]
    fn test_no_source_returns_to_idle() {
        let node = idle_node();
        assert!(matches!(
            node.start(true),
            Err(NodeError::Source(SourceError::NoSourceFound))
        ));
        assert_eq!(node.state(), LifecycleState::Idle);
        assert!(!node.status().engine_present);
    }
}
