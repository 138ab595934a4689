//! Progressive reveal of an agent reply for typing-animation displays.
//!
//! Presentation only: the stored message always carries its full content.

use std::time::Duration;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(15);

/// Growing prefixes of `content`, `step` characters at a time, ending with the
/// whole string. Prefixes always end on a char boundary.
pub struct RevealFrames<'a> {
    content: &'a str,
    step: usize,
    position: usize,
    done: bool,
}

impl<'a> RevealFrames<'a> {
    pub fn new(content: &'a str, step: usize) -> Self {
        Self {
            content,
            step: step.max(1),
            position: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for RevealFrames<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = &self.content[self.position..];
        match rest.char_indices().nth(self.step) {
            Some((offset, _)) => {
                self.position += offset;
                Some(&self.content[..self.position])
            }
            None => {
                self.done = true;
                Some(self.content)
            }
        }
    }
}

/// Replay `content` through `render`, one frame per `interval`.
pub async fn play<F>(content: &str, step: usize, interval: Duration, mut render: F)
where
    F: FnMut(&str),
{
    let mut ticker = tokio::time::interval(interval);
    for frame in RevealFrames::new(content, step) {
        ticker.tick().await;
        render(frame);
    }
}
