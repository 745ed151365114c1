use std::fmt;
use std::sync::Arc;

/// Class label list supplied alongside the model.
#[derive(Clone)]
pub struct Labels(Arc<[Arc<str>]>);

impl Labels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(labels.into_iter().map(|l| Arc::from(l.as_ref())).collect())
    }

    /// Parse a label asset: one label per line, surrounding whitespace and
    /// blank lines ignored.
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Label for `class_id`; ids past the list get a synthetic `class_<id>` name.
    pub fn get(&self, class_id: usize) -> Arc<str> {
        match self.0.get(class_id) {
            Some(label) => Arc::clone(label),
            None => Arc::from(format!("class_{class_id}")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|l| &**l)
    }
}

impl fmt::Debug for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Labels").field("count", &self.len()).finish()
    }
}
