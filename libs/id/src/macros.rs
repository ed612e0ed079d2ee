//! Macros for defining typed numeric identifiers.

/// Macro to define a typed identifier over an unsigned integer.
///
/// This generates a newtype wrapper with:
/// - A `KIND` constant used in error messages
/// - `new()` and `value()`
/// - `is_zero()` (remote systems use zero as "no id")
/// - `Display` and `FromStr` implementations (plain decimal)
/// - `Serialize` and `Deserialize` as a bare integer
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(NodeId, u32, "node id");
///
/// let node: NodeId = "11".parse()?;
/// assert_eq!(node.value(), 11);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $repr:ty, $kind:literal) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($repr);

        impl $name {
            /// Human readable kind, used in error messages.
            pub const KIND: &'static str = $kind;

            #[must_use]
            pub const fn new(value: $repr) -> Self {
                Self(value)
            }

            #[must_use]
            pub const fn value(&self) -> $repr {
                self.0
            }

            /// Returns true for the zero value, which remote systems use to
            /// mean "not assigned".
            #[must_use]
            pub const fn is_zero(&self) -> bool {
                self.0 == 0
            }

            /// Parses an identifier from its decimal string form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                let s = s.trim();
                if s.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }

                s.parse::<$repr>()
                    .map(Self)
                    .map_err(|_| $crate::IdError::InvalidNumber {
                        kind: Self::KIND,
                        actual: s.to_string(),
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $repr {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serde::Serialize::serialize(&self.0, serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                <$repr as serde::Deserialize>::deserialize(deserializer).map(Self)
            }
        }
    };
}
