//! Macros for defining typed ID types.

/// Maximum length of any identifier, in bytes.
pub const MAX_ID_LEN: usize = 256;

/// Macro to define a typed, opaque string ID.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages and logs
/// - `parse()` with strict validation
/// - `as_str()` for borrowing the raw value
/// - `Display`, `FromStr`, `TryFrom<String>` and `TryFrom<&str>`
/// - `Serialize` and `Deserialize` (deserialization validates)
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(OfferId, "offer id");
///
/// let offer_id: OfferId = "o-1".parse()?;
/// assert_eq!(offer_id.as_str(), "o-1");
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        /// An opaque typed identifier.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable name of this ID type.
            pub const KIND: &'static str = $kind;

            /// Parses an ID from a string.
            ///
            /// The value must be non-empty, at most `MAX_ID_LEN` bytes, and
            /// free of whitespace and control characters.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                Self::validate(s)?;
                Ok(Self(s.to_string()))
            }

            fn validate(s: &str) -> Result<(), $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }

                if s.len() > $crate::MAX_ID_LEN {
                    return Err($crate::IdError::TooLong {
                        kind: Self::KIND,
                        len: s.len(),
                        max: $crate::MAX_ID_LEN,
                    });
                }

                if let Some(ch) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
                    return Err($crate::IdError::InvalidCharacter {
                        kind: Self::KIND,
                        ch,
                    });
                }

                Ok(())
            }

            /// Returns the raw string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the ID, returning the raw string value.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::validate(&s)?;
                Ok(Self(s))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = $crate::IdError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::try_from(s).map_err(serde::de::Error::custom)
            }
        }
    };
}
