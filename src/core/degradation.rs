//! Graceful degradation and fallback strategies.
//!
//! An ordered list of fallbacks is tried until one of them produces a
//! value. The result records whether the primary option was used.

use std::fmt;

/// One option in an ordered fallback chain.
pub trait Fallback<I: ?Sized, T> {
    /// Short name used in logs and in the fallback description.
    fn name(&self) -> &str;

    /// Try to produce a value. `None` means "try the next option".
    fn attempt(&self, input: &I) -> Option<T>;
}

/// Fallback result indicating what fallback was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackResult<T> {
    /// The result value
    pub value: T,
    /// Position of the option that produced the value (0 = primary)
    pub position: usize,
    /// Whether a fallback was used
    pub used_fallback: bool,
    /// Description of the fallback used
    pub fallback_description: Option<String>,
}

impl<T> FallbackResult<T> {
    /// Create a primary (non-fallback) result.
    pub fn primary(value: T) -> Self {
        Self { value, position: 0, used_fallback: false, fallback_description: None }
    }

    /// Create a fallback result.
    pub fn fallback(value: T, position: usize, description: impl Into<String>) -> Self {
        Self {
            value,
            position,
            used_fallback: true,
            fallback_description: Some(description.into()),
        }
    }
}

impl<T: fmt::Display> fmt::Display for FallbackResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fallback_description {
            Some(desc) => write!(f, "{} (fallback: {})", self.value, desc),
            None => write!(f, "{}", self.value),
        }
    }
}

/// Try each option in order and return the first value produced.
///
/// Works with any boxed trait object that extends [`Fallback`].
pub fn first_available<I, T, F>(chain: &[Box<F>], input: &I) -> Option<FallbackResult<T>>
where
    I: ?Sized,
    F: Fallback<I, T> + ?Sized,
{
    for (position, option) in chain.iter().enumerate() {
        match option.attempt(input) {
            Some(value) if position == 0 => return Some(FallbackResult::primary(value)),
            Some(value) => {
                tracing::info!(option = option.name(), position, "fallback option used");
                return Some(FallbackResult::fallback(value, position, option.name()));
            }
            None => tracing::warn!(option = option.name(), "option unavailable, trying next"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        value: Option<i32>,
    }

    impl Fallback<str, i32> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn attempt(&self, _input: &str) -> Option<i32> {
            self.value
        }
    }

    fn chain(values: &[Option<i32>]) -> Vec<Box<dyn Fallback<str, i32>>> {
        let names = ["first", "second", "third"];
        values
            .iter()
            .zip(names)
            .map(|(v, name)| Box::new(Fixed { name, value: *v }) as Box<dyn Fallback<str, i32>>)
            .collect()
    }

    #[test]
    fn test_primary_wins() {
        let result = first_available(&chain(&[Some(1), Some(2)]), "x").unwrap();
        assert_eq!(result.value, 1);
        assert!(!result.used_fallback);
        assert_eq!(result.position, 0);
    }

    #[test]
    fn test_falls_through_in_order() {
        let result = first_available(&chain(&[None, None, Some(3)]), "x").unwrap();
        assert_eq!(result.value, 3);
        assert_eq!(result.position, 2);
        assert!(result.used_fallback);
        assert_eq!(result.fallback_description.as_deref(), Some("third"));
    }

    #[test]
    fn test_exhausted_chain() {
        assert!(first_available(&chain(&[None, None]), "x").is_none());
    }

    #[test]
    fn test_display_mentions_fallback() {
        let result = FallbackResult::fallback("link", 2, "local file");
        assert_eq!(result.to_string(), "link (fallback: local file)");
    }
}
