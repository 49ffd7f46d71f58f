use super::signal::FrameClass;
use super::{CaptureError, Sample};

type LevelFn = Box<dyn FnMut(f32) + Send>;
type AudioFn = Box<dyn FnMut(&[Sample], f32) + Send>;
type ErrorFn = Box<dyn FnMut(&CaptureError) + Send>;

/// Optional hooks invoked by the streaming loop.
///
/// All hooks run on the capture thread, once per frame, in capture order.
/// Per frame the order is: silence or speech, then level, then audio.
#[derive(Default)]
pub struct CaptureCallbacks {
    silence: Option<LevelFn>,
    speech: Option<LevelFn>,
    level: Option<LevelFn>,
    audio: Option<AudioFn>,
    error: Option<ErrorFn>,
}

impl CaptureCallbacks {
    /// No hooks registered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the level of every frame classified as silence
    #[must_use]
    pub fn on_silence(mut self, f: impl FnMut(f32) + Send + 'static) -> Self {
        self.silence = Some(Box::new(f));
        self
    }

    /// Called with the level of every frame classified as speech
    #[must_use]
    pub fn on_speech(mut self, f: impl FnMut(f32) + Send + 'static) -> Self {
        self.speech = Some(Box::new(f));
        self
    }

    /// Called with the level of every frame
    #[must_use]
    pub fn on_level(mut self, f: impl FnMut(f32) + Send + 'static) -> Self {
        self.level = Some(Box::new(f));
        self
    }

    /// Called with the (possibly filtered) samples and level of every frame
    #[must_use]
    pub fn on_audio(mut self, f: impl FnMut(&[Sample], f32) + Send + 'static) -> Self {
        self.audio = Some(Box::new(f));
        self
    }

    /// Called once if the stream fails mid-session
    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(&CaptureError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub(crate) fn dispatch(&mut self, class: FrameClass, frame: &[Sample], level: f32) {
        let classified = match class {
            FrameClass::Silence => self.silence.as_mut(),
            FrameClass::Speech => self.speech.as_mut(),
        };
        if let Some(f) = classified {
            f(level);
        }
        if let Some(f) = self.level.as_mut() {
            f(level);
        }
        if let Some(f) = self.audio.as_mut() {
            f(frame, level);
        }
    }

    pub(crate) fn report_error(&mut self, err: &CaptureError) {
        if let Some(f) = self.error.as_mut() {
            f(err);
        }
    }
}

impl std::fmt::Debug for CaptureCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCallbacks")
            .field("silence", &self.silence.is_some())
            .field("speech", &self.speech.is_some())
            .field("level", &self.level.is_some())
            .field("audio", &self.audio.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
