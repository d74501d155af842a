//! Session lifecycle state machine
//!
//! All phase transitions go through `reduce()`, which returns the next phase
//! and the effects the controller must execute. Effects that complete
//! asynchronously (device acquisition, model load, channel open, teardown)
//! feed their result back in as another event.
//!
//! ```text
//! Idle → InitializingVision → Connecting → Live → Closing → Closed
//!              │                                    ▲
//!              └──────────────▶ Failed              │
//!        (Finish/Cancel from any non-terminal phase)┘
//! ```

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    /// Acquiring camera/microphone, then loading the pose model
    InitializingVision {
        session_id: Uuid,
        exercise: String,
        devices_ready: bool,
    },
    Connecting {
        session_id: Uuid,
        exercise: String,
    },
    Live {
        session_id: Uuid,
        exercise: String,
        channel_online: bool,
    },
    Closing {
        session_id: Uuid,
        keep_frames: bool,
    },
    Closed {
        session_id: Uuid,
    },
    Failed {
        message: String,
    },
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::InitializingVision { .. } => "initializing_vision",
            Phase::Connecting { .. } => "connecting",
            Phase::Live { .. } => "live",
            Phase::Closing { .. } => "closing",
            Phase::Closed { .. } => "closed",
            Phase::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start { exercise: String },
    DevicesReady,
    DevicesDenied { message: String },
    VisionReady,
    VisionFailed { message: String },
    ChannelOpened,
    ChannelUnavailable { message: String },
    /// Stop and hand the captured frames to the caller
    Finish,
    /// Stop and discard everything
    Cancel,
    TeardownComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireDevices,
    LoadVision,
    OpenChannel { exercise: String },
    StartWorkers { exercise: String, channel_online: bool },
    /// Release whatever was acquired before a fatal failure
    ReleaseResources,
    Teardown { keep_frames: bool },
    EmitStatus(String),
    Notify(String),
}

/// Reducer function: (phase, event) -> (next_phase, effects)
///
/// Key rules:
/// - Never mutate the phase directly
/// - The channel is only opened once devices and the model are ready
/// - Finish/Cancel outside a running session produce no effects
pub fn reduce(phase: &Phase, event: Event) -> (Phase, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use Phase::*;

    match (phase, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, Start { exercise }) => (
            InitializingVision {
                session_id: Uuid::new_v4(),
                exercise,
                devices_ready: false,
            },
            vec![
                EmitStatus("Requesting camera and microphone".to_string()),
                AcquireDevices,
            ],
        ),

        // -----------------
        // InitializingVision
        // -----------------
        (
            InitializingVision {
                session_id,
                exercise,
                devices_ready: false,
            },
            DevicesReady,
        ) => (
            InitializingVision {
                session_id: *session_id,
                exercise: exercise.clone(),
                devices_ready: true,
            },
            vec![EmitStatus("Loading pose model".to_string()), LoadVision],
        ),
        (InitializingVision { .. }, DevicesDenied { message }) => (
            Failed {
                message: format!("Camera or microphone unavailable: {}", message),
            },
            vec![
                ReleaseResources,
                EmitStatus(format!("Camera or microphone unavailable: {}", message)),
            ],
        ),
        (
            InitializingVision {
                session_id,
                exercise,
                devices_ready: true,
            },
            VisionReady,
        ) => (
            Connecting {
                session_id: *session_id,
                exercise: exercise.clone(),
            },
            vec![
                EmitStatus("Connecting to coach".to_string()),
                OpenChannel {
                    exercise: exercise.clone(),
                },
            ],
        ),
        (InitializingVision { .. }, VisionFailed { message }) => (
            Failed {
                message: format!("Pose model failed to load: {}", message),
            },
            vec![
                ReleaseResources,
                EmitStatus(format!("Pose model failed to load: {}", message)),
            ],
        ),

        // -----------------
        // Connecting
        // -----------------
        (
            Connecting {
                session_id,
                exercise,
            },
            ChannelOpened,
        ) => (
            Live {
                session_id: *session_id,
                exercise: exercise.clone(),
                channel_online: true,
            },
            vec![
                StartWorkers {
                    exercise: exercise.clone(),
                    channel_online: true,
                },
                EmitStatus(format!("Live: {}", exercise)),
            ],
        ),
        // Channel failures are not fatal; local capture and overlay still run
        (
            Connecting {
                session_id,
                exercise,
            },
            ChannelUnavailable { message },
        ) => (
            Live {
                session_id: *session_id,
                exercise: exercise.clone(),
                channel_online: false,
            },
            vec![
                Notify(format!("Coach unavailable: {}", message)),
                StartWorkers {
                    exercise: exercise.clone(),
                    channel_online: false,
                },
                EmitStatus(format!("Live (coach offline): {}", exercise)),
            ],
        ),

        // -----------------
        // Finish / Cancel from any running phase
        // -----------------
        (InitializingVision { session_id, .. }, Finish)
        | (Connecting { session_id, .. }, Finish)
        | (Live { session_id, .. }, Finish) => (
            Closing {
                session_id: *session_id,
                keep_frames: true,
            },
            vec![
                EmitStatus("Finishing set".to_string()),
                Teardown { keep_frames: true },
            ],
        ),
        (InitializingVision { session_id, .. }, Cancel)
        | (Connecting { session_id, .. }, Cancel)
        | (Live { session_id, .. }, Cancel) => (
            Closing {
                session_id: *session_id,
                keep_frames: false,
            },
            vec![Teardown { keep_frames: false }],
        ),

        // -----------------
        // Closing
        // -----------------
        (
            Closing {
                session_id,
                keep_frames,
            },
            TeardownComplete,
        ) => (
            Closed {
                session_id: *session_id,
            },
            vec![EmitStatus(
                if *keep_frames {
                    "Set complete"
                } else {
                    "Session cancelled"
                }
                .to_string(),
            )],
        ),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (phase.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(channel_online: bool) -> Phase {
        Phase::Live {
            session_id: Uuid::new_v4(),
            exercise: "Squat".to_string(),
            channel_online,
        }
    }

    fn drive(events: Vec<Event>) -> (Phase, Vec<Effect>) {
        let mut phase = Phase::Idle;
        let mut all = Vec::new();
        for event in events {
            let (next, effects) = reduce(&phase, event);
            phase = next;
            all.extend(effects);
        }
        (phase, all)
    }

    #[test]
    fn idle_start_acquires_devices_first() {
        let (next, effects) = reduce(
            &Phase::Idle,
            Event::Start {
                exercise: "Squat".to_string(),
            },
        );
        assert!(matches!(
            next,
            Phase::InitializingVision {
                devices_ready: false,
                ..
            }
        ));
        assert!(effects.contains(&Effect::AcquireDevices));
        assert!(!effects.iter().any(|e| matches!(e, Effect::OpenChannel { .. })));
    }

    #[test]
    fn happy_path_reaches_live_with_channel() {
        let (phase, effects) = drive(vec![
            Event::Start {
                exercise: "Squat".to_string(),
            },
            Event::DevicesReady,
            Event::VisionReady,
            Event::ChannelOpened,
        ]);

        assert!(matches!(
            phase,
            Phase::Live {
                channel_online: true,
                ..
            }
        ));

        // Strict order: devices, then model, then channel, then workers
        let order: Vec<usize> = [
            Effect::AcquireDevices,
            Effect::LoadVision,
            Effect::OpenChannel {
                exercise: "Squat".to_string(),
            },
            Effect::StartWorkers {
                exercise: "Squat".to_string(),
                channel_online: true,
            },
        ]
        .iter()
        .map(|wanted| effects.iter().position(|e| e == wanted).unwrap())
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn vision_ready_before_devices_is_ignored() {
        let (phase, effects) = drive(vec![
            Event::Start {
                exercise: "Squat".to_string(),
            },
            Event::VisionReady,
        ]);
        assert!(matches!(phase, Phase::InitializingVision { .. }));
        assert!(!effects.iter().any(|e| matches!(e, Effect::OpenChannel { .. })));
    }

    #[test]
    fn device_denial_fails_without_channel() {
        let (phase, effects) = drive(vec![
            Event::Start {
                exercise: "Squat".to_string(),
            },
            Event::DevicesDenied {
                message: "Permission denied".to_string(),
            },
        ]);
        assert!(matches!(phase, Phase::Failed { .. }));
        assert!(effects.contains(&Effect::ReleaseResources));
        assert!(!effects.iter().any(|e| matches!(e, Effect::OpenChannel { .. })));
    }

    #[test]
    fn vision_failure_fails_without_channel() {
        let (phase, effects) = drive(vec![
            Event::Start {
                exercise: "Squat".to_string(),
            },
            Event::DevicesReady,
            Event::VisionFailed {
                message: "model missing".to_string(),
            },
        ]);
        assert!(matches!(phase, Phase::Failed { ref message } if message.contains("model missing")));
        assert!(!effects.iter().any(|e| matches!(e, Effect::OpenChannel { .. })));
    }

    #[test]
    fn channel_unavailable_still_goes_live_offline() {
        let state = Phase::Connecting {
            session_id: Uuid::new_v4(),
            exercise: "Squat".to_string(),
        };
        let (next, effects) = reduce(
            &state,
            Event::ChannelUnavailable {
                message: "refused".to_string(),
            },
        );
        assert!(matches!(
            next,
            Phase::Live {
                channel_online: false,
                ..
            }
        ));
        assert!(effects.iter().any(|e| matches!(e, Effect::Notify(_))));
        assert!(effects.contains(&Effect::StartWorkers {
            exercise: "Squat".to_string(),
            channel_online: false,
        }));
    }

    #[test]
    fn finish_keeps_frames_cancel_discards() {
        let (next, effects) = reduce(&live(true), Event::Finish);
        assert!(matches!(next, Phase::Closing { keep_frames: true, .. }));
        assert!(effects.contains(&Effect::Teardown { keep_frames: true }));

        let (next, effects) = reduce(&live(true), Event::Cancel);
        assert!(matches!(next, Phase::Closing { keep_frames: false, .. }));
        assert!(effects.contains(&Effect::Teardown { keep_frames: false }));
    }

    #[test]
    fn teardown_complete_closes() {
        let id = Uuid::new_v4();
        let (next, _) = reduce(
            &Phase::Closing {
                session_id: id,
                keep_frames: true,
            },
            Event::TeardownComplete,
        );
        assert_eq!(next, Phase::Closed { session_id: id });
    }

    // =========================================================================
    // Idempotent teardown
    // =========================================================================

    #[test]
    fn finish_and_cancel_are_noops_outside_running_phases() {
        let phases = vec![
            Phase::Idle,
            Phase::Closing {
                session_id: Uuid::new_v4(),
                keep_frames: true,
            },
            Phase::Closed {
                session_id: Uuid::new_v4(),
            },
            Phase::Failed {
                message: "denied".to_string(),
            },
        ];
        for phase in phases {
            for event in [Event::Finish, Event::Cancel] {
                let (next, effects) = reduce(&phase, event);
                assert_eq!(next, phase);
                assert!(effects.is_empty());
            }
        }
    }

    #[test]
    fn late_events_after_close_are_ignored() {
        let closed = Phase::Closed {
            session_id: Uuid::new_v4(),
        };
        for event in [
            Event::DevicesReady,
            Event::VisionReady,
            Event::ChannelOpened,
            Event::TeardownComplete,
        ] {
            let (next, effects) = reduce(&closed, event);
            assert_eq!(next, closed);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn start_is_ignored_once_started() {
        let (next, effects) = reduce(
            &live(true),
            Event::Start {
                exercise: "Plank".to_string(),
            },
        );
        assert!(matches!(next, Phase::Live { .. }));
        assert!(effects.is_empty());
    }
}
