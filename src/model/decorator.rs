//! The closed set of decorator kinds.

/// Effect carried by a `@name(...)` decorator. Names outside this set are
/// rejected by the validator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum DecoratorKind {
    /// Force a value boundary; the region's content must be observable.
    Materialized,
    /// Require bitwise-reproducible selection.
    Deterministic,
    /// Permit transfer source/destination overlap.
    Memmove,
    /// Region is read-only; writes are rejected at dispatch.
    Readonly,
    /// Region is write-only; reads are rejected at dispatch.
    Writeonly,
    /// Bound on concurrently active loop iterations.
    MaxInFlight,
    /// Pin a task to a per-engine unit instance.
    Resource,
    /// Attach a name for debugging output.
    Debug,
    /// Aggregate receipts under a profiling tag.
    Profile,
}

impl DecoratorKind {
    /// Decorators that attach to loops rather than tasks or regions.
    pub const fn is_loop_decorator(&self) -> bool {
        matches!(self, Self::MaxInFlight)
    }

    /// Number of arguments the decorator requires.
    pub const fn arity(&self) -> usize {
        match self {
            Self::Materialized | Self::Deterministic | Self::Memmove | Self::Readonly
            | Self::Writeonly => 0,
            Self::MaxInFlight | Self::Resource | Self::Debug | Self::Profile => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names_use_snake_case() {
        assert_eq!(DecoratorKind::MaxInFlight.to_string(), "max_in_flight");
        assert_eq!(
            DecoratorKind::from_str("readonly").unwrap(),
            DecoratorKind::Readonly
        );
        assert!(DecoratorKind::from_str("inline").is_err());
    }
}
