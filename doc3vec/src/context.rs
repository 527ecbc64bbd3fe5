//! Turning a line of word indexes into one training example per position.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rng::Rng;

/// Where, if anywhere, the paragraph goes in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParagraphSlot {
    None,
    /// Always slot 0.
    Front,
    /// After the context words.
    Appended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Max number of words taken before the center.
    pub before: usize,
    /// Max number of words taken after the center.
    pub after: usize,
    /// `before` and `after` must be equal, and a resampled window stays symmetric.
    pub symmetric: bool,
    pub paragraph: ParagraphSlot,
    /// Fixed-size window: positions past either end of the line are filled
    /// with the start symbol instead of being left out.
    pub padded: bool,
    /// Shrink the window to a random size in `1..=max` at every position.
    pub resample: bool,
}

impl WindowSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symmetric && self.before != self.after {
            return Err(ConfigError::AsymmetricWindow {
                before: self.before,
                after: self.after,
            });
        }
        if self.padded && self.resample {
            return Err(ConfigError::PaddedResample);
        }
        if self.padded && self.paragraph == ParagraphSlot::Appended {
            return Err(ConfigError::PaddedAppendedParagraph);
        }
        Ok(())
    }

    /// Largest possible context.
    pub fn max_size(&self) -> usize {
        self.before + self.after + (self.paragraph != ParagraphSlot::None) as usize
    }
}

/// One training example: the target word and what predicts it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Vocabulary index of the word to predict.
    pub target: usize,
    /// Position of the target within the line.
    pub position: usize,
    slots: Vec<usize>,
    paragraph: Vec<bool>,
    size: usize,
}

impl Context {
    pub fn with_capacity(n: usize) -> Self {
        Context {
            target: 0,
            position: 0,
            slots: vec![0; n],
            paragraph: vec![false; n],
            size: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Word or paragraph index in each slot.
    pub fn slots(&self) -> &[usize] {
        &self.slots[..self.size]
    }

    /// Whether each slot holds the paragraph rather than a word.
    pub fn is_paragraph(&self) -> &[bool] {
        &self.paragraph[..self.size]
    }

    /// The word slots, in order.
    pub fn words(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots()
            .iter()
            .zip(self.is_paragraph())
            .filter(|(_, &p)| !p)
            .map(|(&w, _)| w)
    }

    /// The paragraph slot's index, if there is one.
    pub fn paragraph(&self) -> Option<usize> {
        self.slots()
            .iter()
            .zip(self.is_paragraph())
            .find(|(_, &p)| p)
            .map(|(&w, _)| w)
    }

    fn clear(&mut self) {
        self.size = 0;
    }

    fn push(&mut self, index: usize, is_paragraph: bool) {
        if self.size == self.slots.len() {
            self.slots.push(index);
            self.paragraph.push(is_paragraph);
        } else {
            self.slots[self.size] = index;
            self.paragraph[self.size] = is_paragraph;
        }
        self.size += 1;
    }
}

/// Produces the context of each position of a line. The returned `Context`
/// is reused from one position to the next.
#[derive(Debug, Clone)]
pub struct ContextWindowGenerator {
    spec: WindowSpec,
    context: Context,
}

impl ContextWindowGenerator {
    pub fn new(spec: WindowSpec) -> Result<Self, ConfigError> {
        spec.validate()?;
        Ok(ContextWindowGenerator {
            spec,
            context: Context::with_capacity(spec.max_size()),
        })
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    /// The context for predicting `words[position]`.
    ///
    /// `paragraph` is the line's paragraph index; it is ignored when the
    /// window has no paragraph slot. Padding uses index 0, the start symbol.
    pub fn generate(
        &mut self,
        words: &[usize],
        paragraph: Option<usize>,
        position: usize,
        rng: &mut Rng,
    ) -> &Context {
        let spec = self.spec;
        let (before, after) = self.draw(rng);
        let ctx = &mut self.context;
        ctx.clear();
        ctx.target = words[position];
        ctx.position = position;

        if spec.paragraph == ParagraphSlot::Front {
            if let Some(p) = paragraph {
                ctx.push(p, true);
            }
        }
        for offset in (1..=before).rev() {
            match position.checked_sub(offset) {
                Some(c) => ctx.push(words[c], false),
                None if spec.padded => ctx.push(0, false),
                None => {}
            }
        }
        for offset in 1..=after {
            let c = position + offset;
            if c < words.len() {
                ctx.push(words[c], false);
            } else if spec.padded {
                ctx.push(0, false);
            }
        }
        if spec.paragraph == ParagraphSlot::Appended {
            if let Some(p) = paragraph {
                ctx.push(p, true);
            }
        }
        &self.context
    }

    fn draw(&self, rng: &mut Rng) -> (usize, usize) {
        let spec = &self.spec;
        if !spec.resample {
            (spec.before, spec.after)
        } else if spec.symmetric {
            let r = radius(spec.before, rng);
            (r, r)
        } else {
            (radius(spec.before, rng), radius(spec.after, rng))
        }
    }
}

fn radius(max: usize, rng: &mut Rng) -> usize {
    if max == 0 {
        0
    } else {
        max - rng.next_u64() as usize % max
    }
}
