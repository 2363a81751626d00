//! Optional desktop audio around a console session.

use anyhow::Result;
use mmlive_realtime::LiveSession;

/// Microphone and speaker attached to a session. Dropping it releases both.
#[derive(Default)]
pub struct DesktopAudio {
    #[cfg(feature = "desktop-audio")]
    recorder: Option<mmlive_realtime::MicrophoneRecorder>,
    #[cfg(feature = "desktop-audio")]
    playback: Option<mmlive_realtime::PlaybackHandle>,
    #[cfg(feature = "desktop-audio")]
    forward: Option<tokio::task::JoinHandle<()>>,
}

#[cfg(feature = "desktop-audio")]
impl DesktopAudio {
    pub fn start(session: &LiveSession, mic: bool, speaker: bool) -> Result<Self> {
        use mmlive_realtime::{CaptureEvent, CpalOutput, MicrophoneRecorder, PlaybackHandle};
        use std::sync::Arc;
        use tokio::sync::mpsc;

        let mut audio = Self::default();
        if speaker {
            let playback = PlaybackHandle::spawn(Arc::new(CpalOutput::new()?));
            session.attach_playback(playback.clone())?;
            audio.playback = Some(playback);
        }
        if mic {
            let (tx, mut rx) = mpsc::channel(64);
            audio.recorder = Some(MicrophoneRecorder::start(tx)?);
            let session = session.clone();
            audio.forward = Some(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        CaptureEvent::Chunk(chunk) => {
                            if let Err(e) = session.send_realtime_input(vec![chunk]).await {
                                tracing::warn!(error = %e, "Dropping microphone chunk");
                            }
                        }
                        CaptureEvent::Volume(level) => tracing::trace!(level, "Microphone level"),
                    }
                }
            }));
        }
        Ok(audio)
    }
}

#[cfg(not(feature = "desktop-audio"))]
impl DesktopAudio {
    pub fn start(_session: &LiveSession, mic: bool, speaker: bool) -> Result<Self> {
        if mic || speaker {
            anyhow::bail!("--mic and --speaker need a build with `--features desktop-audio`");
        }
        Ok(Self::default())
    }
}

#[cfg(feature = "desktop-audio")]
impl Drop for DesktopAudio {
    fn drop(&mut self) {
        if let Some(forward) = self.forward.take() {
            forward.abort();
        }
        if let Some(playback) = self.playback.take() {
            playback.shutdown();
        }
    }
}

#[cfg(all(test, not(feature = "desktop-audio")))]
mod tests {
    use super::*;
    use mmlive_realtime::SessionOptions;

    #[tokio::test]
    async fn test_audio_flags_need_the_feature() {
        let session = LiveSession::new(SessionOptions::new("k"));
        assert!(DesktopAudio::start(&session, false, false).is_ok());
        assert!(DesktopAudio::start(&session, true, false).is_err());
        assert!(DesktopAudio::start(&session, false, true).is_err());
    }
}
