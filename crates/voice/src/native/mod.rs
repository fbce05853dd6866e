//! Native implementations of the media seams.
//!
//! `webrtc` provides the peer connection, `audio-io` the microphone and the
//! speakers. Hosts without them can still run the fallback transport.

#[cfg(feature = "audio-io")]
mod capture;
#[cfg(feature = "audio-io")]
mod output;
#[cfg(feature = "webrtc")]
mod resample;
#[cfg(feature = "webrtc")]
mod rtc;

#[cfg(feature = "audio-io")]
pub use capture::CpalCaptureDevice;
#[cfg(feature = "audio-io")]
pub use output::RodioOutput;
#[cfg(feature = "webrtc")]
pub use rtc::RtcMediaConnector;

#[cfg(all(feature = "webrtc", feature = "audio-io"))]
pub fn media_deps() -> crate::media::MediaDeps {
    use std::sync::Arc;

    crate::media::MediaDeps {
        capture: Arc::new(CpalCaptureDevice),
        connector: Arc::new(RtcMediaConnector),
    }
}
