use derive_more::Display;

use crate::bson::{doc, Document};

/// Specifies which kind of server a read should be routed to.
///
/// Server selection itself happens behind the [`ReadBinding`](crate::binding::ReadBinding);
/// operations only need the preference to set the secondary-ok flag on legacy queries and to
/// forward it to mongos.
#[derive(Clone, Debug, Default, Display, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReadPreference {
    #[default]
    #[display("primary")]
    Primary,

    #[display("secondary")]
    Secondary,

    #[display("primaryPreferred")]
    PrimaryPreferred,

    #[display("secondaryPreferred")]
    SecondaryPreferred,

    #[display("nearest")]
    Nearest,
}

impl ReadPreference {
    /// Whether a non-primary member may serve the read.
    pub fn secondary_ok(&self) -> bool {
        !matches!(self, ReadPreference::Primary)
    }

    pub(crate) fn to_document(&self) -> Document {
        doc! { "mode": self.to_string() }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn mode_document() {
        assert_eq!(
            ReadPreference::SecondaryPreferred.to_document(),
            doc! { "mode": "secondaryPreferred" }
        );
        assert_eq!(ReadPreference::default().to_string(), "primary");
        assert!(!ReadPreference::Primary.secondary_ok());
        assert!(ReadPreference::Nearest.secondary_ok());
    }
}
