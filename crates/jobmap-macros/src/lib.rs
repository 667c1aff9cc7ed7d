//! Declarative macros for jobmap.
//!
//! Shared by `jobmap-core` and `jobmap` for the string-backed enums that
//! appear on disk and in the scheduler event stream.

/// Generates `as_str` and `parse_str` methods for a string-backed enum.
///
/// # Example
///
/// ```
/// use jobmap_macros::enum_str;
///
/// #[derive(Debug, PartialEq)]
/// enum Action {
///     Hold,
///     Release,
/// }
///
/// enum_str! {
///     impl Action {
///         pub fn as_str(&self) -> &'static str;
///         pub fn parse_str(raw: &str) -> Option<Self>;
///         variants {
///             Hold => ["hold"],
///             Release => ["release", "unhold"],
///         }
///     }
/// }
///
/// assert_eq!(Action::Hold.as_str(), "hold");
/// assert_eq!(Action::parse_str("unhold"), Some(Action::Release));
/// assert_eq!(Action::parse_str("pause"), None);
/// ```
///
/// `as_str` returns the first string listed for each variant; `parse_str`
/// accepts the first string or any alias after it.
#[macro_export]
macro_rules! enum_str {
    (
        impl $name:ident {
            $as_vis:vis fn as_str(&self) -> &'static str;
            $parse_vis:vis fn parse_str($raw:ident : &str) -> Option<Self>;
            variants {
                $($variant:ident => [$first:expr $(, $alias:expr)*]),+ $(,)?
            }
        }
    ) => {
        impl $name {
            $as_vis fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $first,)+
                }
            }

            #[allow(dead_code)]
            $parse_vis fn parse_str($raw: &str) -> Option<Self> {
                match $raw {
                    $($first $(| $alias)* => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}
