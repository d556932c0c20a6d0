/// Declares an enum of standard protocol values that still round-trips every
/// value of its underlying integer type.
///
/// Named variants map to their listed values. Any other value inside the
/// proprietary range decodes to `Custom`, and everything else to `Reserved`,
/// so nothing read off the wire is ever lost.
///
/// # Example
///
/// ```rust
/// use bacnet_mstp::generate_custom_enum;
///
/// generate_custom_enum! {
///     /// Vendor-extensible command code
///     Command {
///         Start = 1,
///         Stop = 2,
///     },
///     u8,
///     128..=255
/// }
///
/// assert_eq!(u8::from(Command::Stop), 2);
/// assert_eq!(Command::from(1u8), Command::Start);
///
/// match Command::from(200u8) {
///     Command::Custom(v) => assert_eq!(v.value(), 200),
///     other => panic!("unexpected {other}"),
/// }
/// assert!(matches!(Command::from(7u8), Command::Reserved(_)));
/// ```
///
/// The generated enum derives `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq` and
/// `Hash`, implements `core::fmt::Display`, and converts both ways with its
/// unit type. It works without `std`.
#[macro_export]
macro_rules! generate_custom_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident = $value:expr,)+ }, $unit:ident, $custom_range:expr) => {
        $crate::pastey::paste! {
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $name {
                $($variant,)*
                /// Value inside the proprietary range
                Custom( [<$name Value>] ),
                /// Value outside both the standard set and the proprietary range
                Reserved( [<$name Value>] ),
            }

            /// Raw value carried by a non-standard variant
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct [<$name Value>] { value: $unit }

            impl [<$name Value>] {
                pub fn value(&self) -> $unit {
                    self.value
                }
            }

            impl $name {
                /// True for the named standard variants
                pub fn is_standard(&self) -> bool {
                    !matches!(self, $name::Custom(_) | $name::Reserved(_))
                }
            }

            impl core::fmt::Display for $name {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $($name::$variant => f.write_str(stringify!($variant)),)*
                        $name::Custom(v) => write!(f, "Custom({})", v.value),
                        $name::Reserved(v) => write!(f, "Reserved({})", v.value),
                    }
                }
            }

            impl From<$name> for $unit {
                fn from(value: $name) -> Self {
                    match value {
                        $($name::$variant => $value,)*
                        $name::Custom(v) | $name::Reserved(v) => v.value,
                    }
                }
            }

            impl From<$unit> for $name {
                fn from(value: $unit) -> Self {
                    match value {
                        $($value => $name::$variant,)*
                        v if ($custom_range).contains(&v) => {
                            $name::Custom([<$name Value>] { value: v })
                        }
                        v => $name::Reserved([<$name Value>] { value: v }),
                    }
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    generate_custom_enum! {
        /// Test enum
        Level {
            Low = 0,
            High = 10,
        },
        u16,
        1000..=1999
    }

    #[test]
    fn test_named_values() {
        assert_eq!(Level::from(10u16), Level::High);
        assert_eq!(u16::from(Level::Low), 0);
        assert!(Level::High.is_standard());
    }

    #[test]
    fn test_custom_and_reserved() {
        let custom = Level::from(1500u16);
        assert!(matches!(custom, Level::Custom(v) if v.value() == 1500));
        assert_eq!(u16::from(custom), 1500);
        assert!(!custom.is_standard());

        let reserved = Level::from(5u16);
        assert!(matches!(reserved, Level::Reserved(v) if v.value() == 5));
        assert_eq!(u16::from(reserved), 5);
    }

    #[test]
    fn test_display() {
        assert_eq!(Level::High.to_string(), "High");
        assert_eq!(Level::from(1001u16).to_string(), "Custom(1001)");
        assert_eq!(Level::from(3u16).to_string(), "Reserved(3)");
    }
}
