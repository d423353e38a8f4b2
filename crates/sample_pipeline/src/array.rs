//! Dense numeric arrays and their `.npy` encoding.
//!
//! Arrays are stored as native-endian bytes in C order and go through `npyz`
//! when encoded as `.npy`.

use anyhow::{anyhow, bail, ensure, Context, Result};
use bytemuck::Pod;
use npyz::WriterBuilder;

use crate::sample::Payload;

const NPY_HEADER_HINT: usize = 128;

/// Element type of an [`NdArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// Maps an npy type string such as `<f4` or `>i8` onto a dtype. `npyz`
    /// handles the byte order when decoding.
    fn from_descr(descr: &str) -> Result<Self> {
        match descr.trim_start_matches(['<', '>', '|', '=']) {
            "u1" => Ok(DType::U8),
            "i4" => Ok(DType::I32),
            "i8" => Ok(DType::I64),
            "f4" => Ok(DType::F32),
            "f8" => Ok(DType::F64),
            _ => bail!("Unsupported npy dtype '{}'", descr),
        }
    }
}

/// Element types that can back an [`NdArray`].
pub trait Element: Pod + npyz::AutoSerialize + npyz::Deserialize {
    const DTYPE: DType;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}
impl Element for i32 {
    const DTYPE: DType = DType::I32;
}
impl Element for i64 {
    const DTYPE: DType = DType::I64;
}
impl Element for f32 {
    const DTYPE: DType = DType::F32;
}
impl Element for f64 {
    const DTYPE: DType = DType::F64;
}

/// A dense n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl NdArray {
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self> {
        ensure!(
            shape.iter().product::<usize>() == values.len(),
            "Shape {:?} does not match {} elements",
            shape,
            values.len()
        );
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data: bytemuck::cast_slice(&values).to_vec(),
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the elements out as `T`. Fails if `T` is not the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        ensure!(
            T::DTYPE == self.dtype,
            "Array has dtype {:?}, requested {:?}",
            self.dtype,
            T::DTYPE
        );
        Ok(bytemuck::pod_collect_to_vec(&self.data))
    }

    /// Serializes the array in `.npy` format.
    pub fn to_npy(&self) -> Result<Vec<u8>> {
        match self.dtype {
            DType::U8 => self.write_npy::<u8>(),
            DType::I32 => self.write_npy::<i32>(),
            DType::I64 => self.write_npy::<i64>(),
            DType::F32 => self.write_npy::<f32>(),
            DType::F64 => self.write_npy::<f64>(),
        }
    }

    fn write_npy<T: Element>(&self) -> Result<Vec<u8>> {
        let shape: Vec<u64> = self.shape.iter().map(|&d| d as u64).collect();
        let mut buf = Vec::with_capacity(NPY_HEADER_HINT + self.data.len());
        let mut writer = npyz::WriteOptions::<T>::new()
            .default_dtype()
            .shape(&shape)
            .writer(&mut buf)
            .begin_nd()?;
        writer.extend(self.to_vec::<T>()?)?;
        writer.finish()?;
        Ok(buf)
    }

    /// Parses a C-order `.npy` buffer of one of the supported dtypes.
    pub fn from_npy(buf: &[u8]) -> Result<Self> {
        let npy = npyz::NpyFile::new(buf).context("Not a valid npy buffer")?;
        ensure!(
            matches!(npy.order(), npyz::Order::C),
            "Fortran-ordered npy arrays are not supported"
        );
        let dtype = match npy.dtype() {
            npyz::DType::Plain(type_str) => DType::from_descr(&type_str.to_string())?,
            other => bail!("Unsupported npy dtype {:?}", other),
        };
        let shape = npy
            .shape()
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<Vec<_>, _>>()
            .context("npy shape does not fit in memory")?;

        // A corrupt header must not trigger a huge allocation.
        let bytes = shape
            .iter()
            .try_fold(dtype.size(), |acc, &d| acc.checked_mul(d));
        ensure!(
            bytes.is_some_and(|bytes| bytes <= buf.len()),
            "npy shape {:?} exceeds the {} byte buffer",
            shape,
            buf.len()
        );

        match dtype {
            DType::U8 => Self::from_vec(shape, npy.into_vec::<u8>()?),
            DType::I32 => Self::from_vec(shape, npy.into_vec::<i32>()?),
            DType::I64 => Self::from_vec(shape, npy.into_vec::<i64>()?),
            DType::F32 => Self::from_vec(shape, npy.into_vec::<f32>()?),
            DType::F64 => Self::from_vec(shape, npy.into_vec::<f64>()?),
        }
    }

    /// Stacks payloads into one array with a new leading axis.
    ///
    /// Array payloads must agree in dtype and shape. Numeric JSON scalars stack
    /// into a 1-D `i64` array when all are integers, `f64` otherwise.
    pub fn stack(items: &[Payload]) -> Result<Self> {
        match items.first() {
            None => Self::from_vec::<f64>(vec![0], Vec::new()),
            Some(Payload::Array(first)) => {
                let mut data = Vec::with_capacity(first.data.len() * items.len());
                for item in items {
                    let arr = item
                        .as_array()
                        .ok_or_else(|| anyhow!("Cannot stack mixed array and non-array payloads"))?;
                    ensure!(
                        arr.dtype == first.dtype && arr.shape == first.shape,
                        "Cannot stack arrays of {:?}{:?} and {:?}{:?}",
                        first.dtype,
                        first.shape,
                        arr.dtype,
                        arr.shape
                    );
                    data.extend_from_slice(&arr.data);
                }
                let mut shape = vec![items.len()];
                shape.extend_from_slice(&first.shape);
                Ok(Self {
                    dtype: first.dtype,
                    shape,
                    data,
                })
            }
            Some(Payload::Object(_)) => {
                if let Some(ints) = items.iter().map(Payload::as_i64).collect::<Option<Vec<_>>>() {
                    return Self::from_vec(vec![ints.len()], ints);
                }
                let floats = items
                    .iter()
                    .map(Payload::as_f64)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| anyhow!("Only numeric values can be stacked into an array"))?;
                Self::from_vec(vec![floats.len()], floats)
            }
            Some(Payload::Bytes(_)) => bail!("Raw byte payloads cannot be stacked into an array"),
        }
    }
}
