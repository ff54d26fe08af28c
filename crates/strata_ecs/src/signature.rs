use crate::ComponentId;

/// Growable bitset over component type ids. Names an archetype's component
/// set and expresses a query's data requirements.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Signature {
  words: Vec<u64>,
}

impl Signature {
  pub fn from_ids(ids: &[ComponentId]) -> Self {
    let mut signature = Signature::default();
    for &id in ids {
      signature.set(id);
    }
    signature
  }

  pub fn set(&mut self, comp: ComponentId) {
    let (word, bit) = Self::split(comp);
    if word >= self.words.len() {
      self.words.resize(word + 1, 0);
    }
    self.words[word] |= 1 << bit;
  }

  pub fn has(&self, comp: ComponentId) -> bool {
    let (word, bit) = Self::split(comp);
    self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
  }

  /// Superset test: every bit set in `other` is also set in `self`.
  pub fn contains_all(&self, other: &Signature) -> bool {
    for (i, &word) in other.words.iter().enumerate() {
      let own = self.words.get(i).copied().unwrap_or(0);
      if own & word != word {
        return false;
      }
    }
    true
  }

  fn split(comp: ComponentId) -> (usize, u32) {
    ((comp / 64) as usize, (comp % 64) as u32)
  }
}
