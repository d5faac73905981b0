//! Element types storable in device arrays.

use num_complex::Complex;

use crate::{DeviceError, Result};

/// How values of an element type are laid out in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementLayout {
    /// Fixed-size plain bit data.
    Bits { size: usize, align: usize },
    /// The layout depends on which variant a value holds, so a kernel cannot
    /// commit to a single per-element representation.
    Union,
    /// Values refer to host memory and cannot be copied to a device as bits.
    Indirect,
}

impl ElementLayout {
    /// Layout of a plain `T`.
    pub const fn bits_of<T>() -> Self {
        ElementLayout::Bits {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }

    /// Whether the layout is fixed-size bit data.
    pub const fn is_bits(&self) -> bool {
        matches!(self, ElementLayout::Bits { .. })
    }
}

/// Element types usable as device array contents and kernel results.
///
/// Only types whose [`Element::LAYOUT`] is [`ElementLayout::Bits`] can be
/// materialized on a device; the engine checks this with [`check_element`]
/// before it allocates or dispatches anything.
pub trait Element: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Device layout of this type.
    const LAYOUT: ElementLayout;

    /// Name used in diagnostics.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

macro_rules! impl_bits_element {
    ($($t:ty),* $(,)?) => {
        $(
            impl Element for $t {
                const LAYOUT: ElementLayout = ElementLayout::bits_of::<$t>();
            }
        )*
    };
}

impl_bits_element!(
    bool, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64
);

impl<T: Element> Element for Complex<T> {
    const LAYOUT: ElementLayout = match T::LAYOUT {
        ElementLayout::Bits { .. } => ElementLayout::bits_of::<Complex<T>>(),
        other => other,
    };
}

/// `Option<T>` mixes an absent marker with `T` payloads.
impl<T: Element> Element for Option<T> {
    const LAYOUT: ElementLayout = ElementLayout::Union;
}

/// String slices point at host memory.
impl Element for &'static str {
    const LAYOUT: ElementLayout = ElementLayout::Indirect;
}

/// Reject element types that cannot be materialized on a device.
pub fn check_element<T: Element>() -> Result<()> {
    match T::LAYOUT {
        ElementLayout::Bits { .. } => Ok(()),
        ElementLayout::Union => Err(DeviceError::NonConcreteElementType(T::type_name())),
        ElementLayout::Indirect => Err(DeviceError::NonRepresentableElementType(T::type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bits<T: Element>() {
        assert!(T::LAYOUT.is_bits(), "{} should be bits", T::type_name());
        check_element::<T>().unwrap();
    }

    #[test]
    fn test_primitive_layouts() {
        assert_bits::<f32>();
        assert_bits::<f64>();
        assert_bits::<i32>();
        assert_bits::<u8>();
        assert_bits::<bool>();
        assert_eq!(
            f64::LAYOUT,
            ElementLayout::Bits { size: 8, align: 8 }
        );
    }

    #[test]
    fn test_complex_is_bits() {
        assert_bits::<Complex<f64>>();
        assert_eq!(
            <Complex<f32> as Element>::LAYOUT,
            ElementLayout::Bits { size: 8, align: 4 }
        );
    }

    #[test]
    fn test_option_is_not_concrete() {
        let err = check_element::<Option<f64>>().unwrap_err();
        assert!(matches!(err, DeviceError::NonConcreteElementType(_)));
    }

    #[test]
    fn test_str_is_not_representable() {
        let err = check_element::<&'static str>().unwrap_err();
        assert!(matches!(err, DeviceError::NonRepresentableElementType(_)));
    }

    #[test]
    fn test_custom_union_element() {
        #[derive(Debug, Clone, Copy, Default)]
        #[allow(dead_code)]
        enum Number {
            #[default]
            Empty,
            Int(i64),
            Float(f32),
        }

        impl Element for Number {
            const LAYOUT: ElementLayout = ElementLayout::Union;
        }

        let err = check_element::<Number>().unwrap_err();
        assert!(err.to_string().contains("Number"));
    }
}
