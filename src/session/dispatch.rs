//! Command dispatch
//!
//! Turns client messages into hub operations and replies. Malformed input
//! and commands the session is not entitled to send are answered with
//! `UNKNOWN_COMMAND`; hub failures become `ERROR: <message>`. Nothing a
//! client sends can end the session.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::context::Session;
use super::state::{Role, SessionPhase};
use crate::protocol::{ClientMessage, Reply};
use crate::registry::BroadcastHub;
use crate::server::ApiKey;

/// Per-session command handler
pub struct Dispatcher {
    session: Arc<Session>,
    hub: Arc<BroadcastHub>,
    api_key: Arc<ApiKey>,
}

impl Dispatcher {
    /// Bind a session to the hub it controls or watches
    pub fn new(session: Arc<Session>, hub: Arc<BroadcastHub>, api_key: Arc<ApiKey>) -> Self {
        Self {
            session,
            hub,
            api_key,
        }
    }

    /// The session this dispatcher serves
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Handle one text message and queue the replies
    pub async fn handle_text(&self, text: &str) -> Vec<Reply> {
        let replies = match ClientMessage::parse(text) {
            Some(message) => self.dispatch(message).await,
            None => vec![Reply::UnknownCommand],
        };

        for reply in &replies {
            self.session.send_reply(reply.to_string());
        }
        replies
    }

    /// Apply a parsed message and return the replies, in order
    pub async fn dispatch(&self, message: ClientMessage) -> Vec<Reply> {
        let phase = self.session.phase();

        tracing::debug!(
            session_id = self.session.id(),
            phase = %phase,
            kind = message.kind(),
            "Client message"
        );

        if let ClientMessage::Auth { api_key, role } = message {
            return self.authenticate(phase, &api_key, role).await;
        }

        if !phase.is_authenticated() || (message.requires_controller() && !phase.is_controller()) {
            return vec![Reply::UnknownCommand];
        }

        let reply = match message {
            ClientMessage::Auth { .. } => Reply::UnknownCommand,
            ClientMessage::Config {
                camera_index,
                resolution,
                fps,
            } => {
                let config = self.hub.config();
                let resolution = resolution.unwrap_or_else(|| config.default_resolution.to_string());
                let fps = fps.unwrap_or(config.default_fps);

                match self.hub.start_streaming(camera_index, &resolution, fps).await {
                    Ok(()) => {
                        // Stopping clears the registry; the controller watches what it starts
                        self.hub.add_viewer(&self.session).await;
                        Reply::ConfigApplied
                    }
                    Err(e) => Reply::error(e),
                }
            }
            ClientMessage::Stop => {
                self.hub.stop_streaming().await;
                Reply::StreamStopped
            }
            ClientMessage::RecordStart => match self.hub.start_recording().await {
                Ok(_) => Reply::RecordingStarted,
                Err(e) => Reply::error(e),
            },
            ClientMessage::RecordStop => match self.hub.stop_recording().await {
                Ok(_) => Reply::RecordingStopped,
                Err(e) => Reply::error(e),
            },
            ClientMessage::PlaybackStart { filename } => {
                match self.hub.start_playback(&filename, &self.session).await {
                    Ok(()) => Reply::PlaybackStarted,
                    Err(e) => Reply::error(e),
                }
            }
            ClientMessage::PlaybackPause => {
                self.hub.pause_playback().await;
                Reply::PlaybackPaused
            }
            ClientMessage::PlaybackResume => {
                self.hub.resume_playback().await;
                Reply::PlaybackResumed
            }
            ClientMessage::PlaybackStop => {
                self.hub.stop_playback().await;
                Reply::PlaybackStopped
            }
            ClientMessage::PlaybackSpeed { speed } => {
                let applied = self.hub.set_playback_speed(speed).await;
                tracing::debug!(requested = speed, applied = applied, "Playback speed changed");
                Reply::PlaybackSpeedChanged
            }
        };

        vec![reply]
    }

    async fn authenticate(&self, phase: SessionPhase, presented: &str, requested: Role) -> Vec<Reply> {
        if phase == SessionPhase::Closed {
            return Vec::new();
        }

        if !self.api_key.matches(presented) {
            tracing::warn!(session_id = self.session.id(), "Authentication failed");
            return vec![Reply::AuthFailed];
        }

        // An authenticated session re-registers under the role it holds
        let role = phase.role().unwrap_or(requested);

        match role {
            Role::Controller => {
                if let Err(e) = self.hub.claim_controller(&self.session).await {
                    tracing::warn!(session_id = self.session.id(), error = %e, "Controller rejected");
                    return vec![Reply::error(e)];
                }
                self.session.authenticate(Role::Controller);
                vec![Reply::AuthControllerSuccess]
            }
            Role::Viewer => {
                self.session.authenticate(Role::Viewer);
                self.hub.add_viewer(&self.session).await;
                tracing::info!(session_id = self.session.id(), "Viewer authenticated");
                vec![Reply::AuthViewerSuccess, Reply::status(self.hub.is_streaming())]
            }
        }
    }

    /// Close the session and deregister it in the background
    ///
    /// The hub work runs on its own task; the returned handle may be dropped.
    pub fn teardown(&self) -> JoinHandle<()> {
        let phase = self.session.close();
        let session_id = self.session.id();
        let hub = Arc::clone(&self.hub);

        tracing::debug!(session_id = session_id, phase = %phase, "Session closed");

        tokio::spawn(async move {
            hub.release_session(session_id, phase).await;
        })
    }
}
