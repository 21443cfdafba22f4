//! Slot descriptions and the byte buffers backing them.
//!
//! Slot storage is untyped bytes so that copies across the boundary are
//! byte-for-byte, with no shape or type coercion. Typed views are only built
//! when handing data to the engine.

use std::fmt;

use crate::error::{BridgeError, Result};

/// Which side of the model a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Input,
    Output,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Element types a slot may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
    U8,
    I8,
    I32,
    I64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::U8 | Self::I8 => 1,
            Self::I64 => 8,
        }
    }

    /// Code reported by `ib_get_*_type`. Zero is reserved for "unknown".
    pub fn code(self) -> i32 {
        match self {
            Self::F32 => 1,
            Self::U8 => 2,
            Self::I8 => 3,
            Self::I32 => 4,
            Self::I64 => 5,
        }
    }

    /// Inverse of [`ElementType::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::F32),
            2 => Some(Self::U8),
            3 => Some(Self::I8),
            4 => Some(Self::I32),
            5 => Some(Self::I64),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::I32 => "i32",
            Self::I64 => "i64",
        };
        f.write_str(name)
    }
}

/// A plain numeric element that slot bytes can be reinterpreted as.
pub trait Element: bytemuck::Pod {
    const TYPE: ElementType;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;
}

impl Element for u8 {
    const TYPE: ElementType = ElementType::U8;
}

impl Element for i8 {
    const TYPE: ElementType = ElementType::I8;
}

impl Element for i32 {
    const TYPE: ElementType = ElementType::I32;
}

impl Element for i64 {
    const TYPE: ElementType = ElementType::I64;
}

/// Static description of a slot as declared by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    /// Name the engine knows the slot by.
    pub name: String,
    /// Declared element type.
    pub element_type: ElementType,
    /// Declared dimensions; negative values are dynamic.
    pub dims: Vec<i64>,
}

impl SlotSpec {
    /// Concrete shape used for allocation. Dynamic dimensions become 1.
    pub fn resolved_shape(&self) -> Vec<usize> {
        self.dims
            .iter()
            .map(|&d| if d < 0 { 1 } else { d as usize })
            .collect()
    }

    /// Whether any declared dimension is dynamic.
    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(|&d| d < 0)
    }
}

/// Owned storage for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    element_type: ElementType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl TensorBuffer {
    /// Allocate a zero-filled buffer for `spec`.
    pub fn allocate(spec: &SlotSpec) -> Result<Self> {
        let shape = spec.resolved_shape();
        let byte_len = shape
            .iter()
            .try_fold(spec.element_type.size(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                BridgeError::allocation(format!(
                    "slot '{}' with shape {:?} overflows addressable memory",
                    spec.name, shape
                ))
            })?;
        Ok(Self {
            element_type: spec.element_type,
            shape,
            data: vec![0; byte_len],
        })
    }

    /// Wrap raw bytes. Fails if the byte count does not match the shape.
    pub fn from_bytes(element_type: ElementType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * element_type.size();
        if data.len() != expected {
            return Err(BridgeError::inference(format!(
                "{} tensor of shape {:?} needs {} bytes, got {}",
                element_type,
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            element_type,
            shape,
            data,
        })
    }

    /// Build a buffer from typed elements.
    pub fn from_elements<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self> {
        let data = bytemuck::cast_slice::<T, u8>(values).to_vec();
        Self::from_bytes(T::TYPE, shape, data)
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decode the buffer as `T`. The buffer's element type must be `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.element_type != T::TYPE {
            return Err(BridgeError::inference(format!(
                "cannot view {} tensor as {}",
                self.element_type,
                T::TYPE
            )));
        }
        // Slot bytes carry no alignment guarantee, so copy into typed storage
        // instead of casting in place.
        let mut values = vec![T::zeroed(); self.element_count()];
        bytemuck::cast_slice_mut::<T, u8>(&mut values).copy_from_slice(&self.data);
        Ok(values)
    }

    /// Overwrite the leading bytes with `length` elements of `src`.
    ///
    /// Preconditions, all checked before any byte is written: `length` is
    /// non-negative, `src` holds at least `length` elements, and the copy fits
    /// in this buffer. Bytes past the copied prefix are left untouched.
    pub fn write_prefix<T: Element>(&mut self, src: &[T], length: i32) -> Result<()> {
        let count = checked_length(length, src.len(), "source")?;
        let byte_len = self.fits(count, T::TYPE.size())?;
        self.data[..byte_len].copy_from_slice(bytemuck::cast_slice(&src[..count]));
        Ok(())
    }

    /// Copy the leading `length` elements into `dest`.
    ///
    /// Same preconditions as [`TensorBuffer::write_prefix`], with `dest` as
    /// the capacity-checked side. Nothing is clamped.
    pub fn read_prefix<T: Element>(&self, dest: &mut [T], length: i32) -> Result<()> {
        let count = checked_length(length, dest.len(), "destination")?;
        let byte_len = self.fits(count, T::TYPE.size())?;
        bytemuck::cast_slice_mut::<T, u8>(&mut dest[..count])
            .copy_from_slice(&self.data[..byte_len]);
        Ok(())
    }

    fn fits(&self, count: usize, size: usize) -> Result<usize> {
        let byte_len = count
            .checked_mul(size)
            .ok_or_else(|| BridgeError::buffer(format!("length {count} overflows")))?;
        if byte_len > self.data.len() {
            return Err(BridgeError::buffer(format!(
                "{} elements of {} bytes exceed slot size of {} bytes",
                count,
                size,
                self.data.len()
            )));
        }
        Ok(byte_len)
    }
}

fn checked_length(length: i32, available: usize, side: &str) -> Result<usize> {
    let count = usize::try_from(length)
        .map_err(|_| BridgeError::buffer(format!("negative length {length}")))?;
    if count > available {
        return Err(BridgeError::buffer(format!(
            "length {} exceeds {} buffer of {} elements",
            count, side, available
        )));
    }
    Ok(count)
}
