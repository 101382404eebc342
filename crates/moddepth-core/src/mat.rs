//! Level-5 MAT-file codec (MATLAB v5/v6/v7 `save` format).
//!
//! Only numeric arrays are decoded; cells, structs, char arrays and sparse
//! matrices are skipped. Compressed (`miCOMPRESSED`) elements are inflated
//! with zlib. v7.3 files are HDF5 containers and are rejected.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::ZlibDecoder;
use ndarray::{Array3, ShapeBuilder};
use tracing::debug;

use crate::error::MatError;

const HEADER_LEN: usize = 128;
const HEADER_TEXT_LEN: usize = 116;
const TAG_LEN: usize = 8;
const VERSION_5: u16 = 0x0100;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

const FLAG_COMPLEX: u32 = 0x0800;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

macro_rules! read_word {
    ($name:ident, $t:ty) => {
        fn $name(self, b: &[u8]) -> $t {
            let mut a = [0u8; std::mem::size_of::<$t>()];
            a.copy_from_slice(&b[..std::mem::size_of::<$t>()]);
            match self {
                Endian::Little => <$t>::from_le_bytes(a),
                Endian::Big => <$t>::from_be_bytes(a),
            }
        }
    };
}

impl Endian {
    read_word!(read_u16, u16);
    read_word!(read_u32, u32);
    read_word!(read_i32, i32);
}

macro_rules! decode_as {
    ($bytes:expr, $endian:expr, $t:ty) => {{
        const WIDTH: usize = std::mem::size_of::<$t>();
        $bytes
            .chunks_exact(WIDTH)
            .map(|c| {
                let mut a = [0u8; WIDTH];
                a.copy_from_slice(c);
                (match $endian {
                    Endian::Little => <$t>::from_le_bytes(a),
                    Endian::Big => <$t>::from_be_bytes(a),
                }) as f64
            })
            .collect::<Vec<f64>>()
    }};
}

/// MATLAB array class of a numeric variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatClass {
    Double,
    Single,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
}

impl MatClass {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            6 => MatClass::Double,
            7 => MatClass::Single,
            8 => MatClass::Int8,
            9 => MatClass::UInt8,
            10 => MatClass::Int16,
            11 => MatClass::UInt16,
            12 => MatClass::Int32,
            13 => MatClass::UInt32,
            14 => MatClass::Int64,
            15 => MatClass::UInt64,
            _ => return None,
        })
    }
}

/// Numeric variable. `real` is stored column-major, as in the file.
#[derive(Clone, Debug, PartialEq)]
pub struct MatArray {
    pub class: MatClass,
    pub dims: Vec<usize>,
    pub real: Vec<f64>,
}

impl MatArray {
    pub fn scalar(value: f64) -> Self {
        MatArray {
            class: MatClass::Double,
            dims: vec![1, 1],
            real: vec![value],
        }
    }

    pub fn from_array3(data: &Array3<f64>) -> Self {
        MatArray {
            class: MatClass::Double,
            dims: data.shape().to_vec(),
            // Reversed axes iterate the original in column-major order.
            real: data.t().iter().copied().collect(),
        }
    }
}

/// Variables of one MAT file, keyed by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatFile {
    variables: BTreeMap<String, MatArray>,
}

impl MatFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self, MatError> {
        let bytes = fs::read(path).map_err(|source| MatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MatError> {
        if bytes.len() < HEADER_LEN {
            return Err(MatError::BadHeader(format!(
                "{} bytes is shorter than the {}-byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }
        let text = &bytes[..HEADER_TEXT_LEN];
        if text.starts_with(b"MATLAB 7.3") {
            return Err(MatError::Hdf5Unsupported);
        }
        if !text.starts_with(b"MATLAB") {
            return Err(MatError::BadHeader("missing MATLAB header text".into()));
        }
        let endian = match &bytes[126..128] {
            b"IM" => Endian::Little,
            b"MI" => Endian::Big,
            other => {
                return Err(MatError::BadHeader(format!("endian indicator {:?}", other)));
            }
        };
        let version = endian.read_u16(&bytes[124..126]);
        if version != VERSION_5 {
            return Err(MatError::BadHeader(format!("version 0x{:04x}", version)));
        }

        let mut file = MatFile::new();
        file.read_elements(&bytes[HEADER_LEN..], endian, HEADER_LEN)?;
        Ok(file)
    }

    fn read_elements(&mut self, buf: &[u8], endian: Endian, base: usize) -> Result<(), MatError> {
        let mut reader = ElementReader::new(buf, endian, base);
        while let Some(element) = reader.next_element()? {
            match element.data_type {
                MI_COMPRESSED => {
                    let mut inflated = Vec::new();
                    ZlibDecoder::new(element.data)
                        .read_to_end(&mut inflated)
                        .map_err(MatError::Decompress)?;
                    self.read_elements(&inflated, endian, element.offset)?;
                }
                MI_MATRIX => {
                    if let Some((name, array)) = parse_matrix(element.data, endian, element.offset)? {
                        self.variables.insert(name, array);
                    }
                }
                other => debug!(data_type = other, offset = element.offset, "skipping top-level element"),
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MatArray> {
        self.variables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, array: MatArray) {
        self.variables.insert(name.into(), array);
    }

    /// A 3-D variable as a row-major array. 2-D variables get a trailing
    /// singleton axis, since MATLAB drops trailing singleton dimensions.
    pub fn array3(&self, name: &str) -> Result<Array3<f64>, MatError> {
        let var = self
            .get(name)
            .ok_or_else(|| MatError::MissingVariable(name.to_string()))?;
        let shape = match var.dims.as_slice() {
            &[a, b] => (a, b, 1),
            &[a, b, c] => (a, b, c),
            _ => {
                return Err(MatError::Shape {
                    name: name.to_string(),
                    dims: var.dims.clone(),
                    expected: "a 2-D or 3-D array",
                })
            }
        };
        let column_major = Array3::from_shape_vec(shape.f(), var.real.clone())
            .map_err(|e| MatError::Malformed(format!("{}: {}", name, e)))?;
        Ok(column_major.as_standard_layout().into_owned())
    }

    pub fn scalar(&self, name: &str) -> Result<f64, MatError> {
        let var = self
            .get(name)
            .ok_or_else(|| MatError::MissingVariable(name.to_string()))?;
        match var.real.as_slice() {
            &[value] => Ok(value),
            _ => Err(MatError::Shape {
                name: name.to_string(),
                dims: var.dims.clone(),
                expected: "a scalar",
            }),
        }
    }

    /// Uncompressed little-endian level-5 encoding; every variable is
    /// written as double.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        let mut text = b"MATLAB 5.0 MAT-file, written by moddepth-core".to_vec();
        text.resize(HEADER_TEXT_LEN, b' ');
        out.extend_from_slice(&text);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&VERSION_5.to_le_bytes());
        out.extend_from_slice(b"IM");
        for (name, array) in &self.variables {
            out.extend_from_slice(&encode_matrix_element(name, array));
        }
        out
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_bytes())
    }
}

struct Element<'a> {
    data_type: u32,
    data: &'a [u8],
    offset: usize,
}

struct ElementReader<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
    base: usize,
}

impl<'a> ElementReader<'a> {
    fn new(buf: &'a [u8], endian: Endian, base: usize) -> Self {
        ElementReader {
            buf,
            pos: 0,
            endian,
            base,
        }
    }

    fn next_element(&mut self) -> Result<Option<Element<'a>>, MatError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let offset = self.base + self.pos;
        if self.buf.len() - self.pos < TAG_LEN {
            return Err(MatError::Truncated { offset });
        }

        let first = self.endian.read_u32(&self.buf[self.pos..]);
        let small_len = (first >> 16) as usize;
        if small_len != 0 {
            // Small element: type and length share the first word, data
            // sits in the second.
            if small_len > 4 {
                return Err(MatError::Malformed(format!(
                    "small element of {} bytes at byte {}",
                    small_len, offset
                )));
            }
            let start = self.pos + 4;
            let data = &self.buf[start..start + small_len];
            self.pos += TAG_LEN;
            return Ok(Some(Element {
                data_type: first & 0xFFFF,
                data,
                offset,
            }));
        }

        let len = self.endian.read_u32(&self.buf[self.pos + 4..]) as usize;
        let start = self.pos + TAG_LEN;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(MatError::Truncated { offset })?;
        let next = if first == MI_COMPRESSED {
            end
        } else {
            start + padded(len)
        };
        self.pos = next.min(self.buf.len());
        Ok(Some(Element {
            data_type: first,
            data: &self.buf[start..end],
            offset,
        }))
    }

    fn expect(&mut self, what: &str) -> Result<Element<'a>, MatError> {
        let offset = self.base + self.pos;
        self.next_element()?
            .ok_or_else(|| MatError::Malformed(format!("missing {} at byte {}", what, offset)))
    }
}

fn padded(len: usize) -> usize {
    (len + TAG_LEN - 1) / TAG_LEN * TAG_LEN
}

fn parse_matrix(
    data: &[u8],
    endian: Endian,
    offset: usize,
) -> Result<Option<(String, MatArray)>, MatError> {
    if data.is_empty() {
        return Ok(None);
    }
    let mut sub = ElementReader::new(data, endian, offset + TAG_LEN);

    let flags = sub.expect("array flags")?;
    if flags.data_type != MI_UINT32 || flags.data.len() < 8 {
        return Err(MatError::Malformed(format!("bad array flags at byte {}", flags.offset)));
    }
    let flag_word = endian.read_u32(flags.data);
    let class_code = (flag_word & 0xFF) as u8;
    let complex = flag_word & FLAG_COMPLEX != 0;

    let dims_el = sub.expect("dimensions")?;
    if dims_el.data_type != MI_INT32 || dims_el.data.len() % 4 != 0 {
        return Err(MatError::Malformed(format!("bad dimensions at byte {}", dims_el.offset)));
    }
    let dims = dims_el
        .data
        .chunks_exact(4)
        .map(|c| usize::try_from(endian.read_i32(c)))
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|_| MatError::Malformed(format!("negative dimension at byte {}", dims_el.offset)))?;

    let name_el = sub.expect("array name")?;
    let name = String::from_utf8_lossy(name_el.data)
        .trim_end_matches('\0')
        .to_string();

    let class = match MatClass::from_code(class_code) {
        Some(class) => class,
        None => {
            debug!(%name, class_code, "skipping non-numeric variable");
            return Ok(None);
        }
    };

    let real = decode_numeric(&sub.expect("real part")?, endian)?;
    if complex {
        sub.expect("imaginary part")?;
    }

    let expected = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| MatError::Malformed(format!("{}: dimensions {:?} overflow", name, dims)))?;
    if real.len() != expected {
        return Err(MatError::Malformed(format!(
            "{}: {} values for dimensions {:?}",
            name,
            real.len(),
            dims
        )));
    }
    Ok(Some((name, MatArray { class, dims, real })))
}

fn decode_numeric(element: &Element<'_>, endian: Endian) -> Result<Vec<f64>, MatError> {
    let width = match element.data_type {
        MI_INT8 | MI_UINT8 => 1,
        MI_INT16 | MI_UINT16 => 2,
        MI_INT32 | MI_UINT32 | MI_SINGLE => 4,
        MI_DOUBLE | MI_INT64 | MI_UINT64 => 8,
        other => return Err(MatError::UnsupportedDataType(other)),
    };
    let bytes = element.data;
    if bytes.len() % width != 0 {
        return Err(MatError::Malformed(format!(
            "{} bytes is not a whole number of {}-byte values at byte {}",
            bytes.len(),
            width,
            element.offset
        )));
    }
    Ok(match element.data_type {
        MI_INT8 => decode_as!(bytes, endian, i8),
        MI_UINT8 => decode_as!(bytes, endian, u8),
        MI_INT16 => decode_as!(bytes, endian, i16),
        MI_UINT16 => decode_as!(bytes, endian, u16),
        MI_INT32 => decode_as!(bytes, endian, i32),
        MI_UINT32 => decode_as!(bytes, endian, u32),
        MI_SINGLE => decode_as!(bytes, endian, f32),
        MI_INT64 => decode_as!(bytes, endian, i64),
        MI_UINT64 => decode_as!(bytes, endian, u64),
        _ => decode_as!(bytes, endian, f64),
    })
}

fn push_element(out: &mut Vec<u8>, data_type: u32, data: &[u8]) {
    out.extend_from_slice(&data_type.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out.resize(out.len() + padded(data.len()) - data.len(), 0);
}

/// One little-endian `miMATRIX` element holding `array` as double.
pub(crate) fn encode_matrix_element(name: &str, array: &MatArray) -> Vec<u8> {
    let mut body = Vec::new();

    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&6u32.to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    push_element(&mut body, MI_UINT32, &flags);

    let dims: Vec<u8> = array
        .dims
        .iter()
        .flat_map(|&d| (d as i32).to_le_bytes())
        .collect();
    push_element(&mut body, MI_INT32, &dims);

    push_element(&mut body, MI_INT8, name.as_bytes());

    let real: Vec<u8> = array.real.iter().flat_map(|v| v.to_le_bytes()).collect();
    push_element(&mut body, MI_DOUBLE, &real);

    let mut out = Vec::with_capacity(body.len() + TAG_LEN);
    out.extend_from_slice(&MI_MATRIX.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn header() -> Vec<u8> {
        let mut bytes = MatFile::new().to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        bytes.truncate(HEADER_LEN);
        bytes
    }

    fn sample_trials() -> Array3<f64> {
        Array3::from_shape_fn((2, 4, 3), |(c, t, s)| (c * 100 + t * 10 + s) as f64)
    }

    #[test]
    fn written_file_reads_back() {
        let mut file = MatFile::new();
        file.insert("data", MatArray::from_array3(&sample_trials()));
        file.insert("sampleRate", MatArray::scalar(5000.0));

        let decoded = MatFile::from_bytes(&file.to_bytes()).unwrap();
        assert_eq!(decoded.array3("data").unwrap(), sample_trials());
        assert_eq!(decoded.scalar("sampleRate").unwrap(), 5000.0);
        assert_eq!(decoded.names().collect::<Vec<_>>(), vec!["data", "sampleRate"]);
    }

    #[test]
    fn column_major_layout_matches_matlab() {
        // MATLAB stores A(1,1,1), A(2,1,1), A(1,2,1), ...
        let arr = MatArray::from_array3(&sample_trials());
        assert_eq!(&arr.real[..4], &[0.0, 100.0, 10.0, 110.0]);
    }

    #[test]
    fn compressed_element_is_inflated() {
        let element = encode_matrix_element("data", &MatArray::from_array3(&sample_trials()));
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&element).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut bytes = header();
        bytes.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
        bytes.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&compressed);

        let decoded = MatFile::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.array3("data").unwrap(), sample_trials());
    }

    #[test]
    fn small_elements_and_narrow_types() {
        // 1x1 uint16 variable "fs" with a small-format name and value.
        let mut body = Vec::new();
        push_element(&mut body, MI_UINT32, &[11, 0, 0, 0, 0, 0, 0, 0]);
        push_element(&mut body, MI_INT32, &[1, 0, 0, 0, 1, 0, 0, 0]);
        body.extend_from_slice(&((2u32 << 16) | MI_INT8).to_le_bytes());
        body.extend_from_slice(b"fs\0\0");
        body.extend_from_slice(&((2u32 << 16) | MI_UINT16).to_le_bytes());
        body.extend_from_slice(&[0x88, 0x13, 0, 0]);

        let mut bytes = header();
        bytes.extend_from_slice(&MI_MATRIX.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);

        let decoded = MatFile::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.get("fs").unwrap().class, MatClass::UInt16);
        assert_eq!(decoded.scalar("fs").unwrap(), 5000.0);
    }

    #[test]
    fn two_dimensional_variable_gets_singleton_axis() {
        let mut file = MatFile::new();
        file.insert(
            "data",
            MatArray {
                class: MatClass::Double,
                dims: vec![2, 3],
                real: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            },
        );
        let arr = MatFile::from_bytes(&file.to_bytes()).unwrap().array3("data").unwrap();
        assert_eq!(arr.shape(), &[2, 3, 1]);
        assert_eq!(arr[[1, 2, 0]], 6.0);
    }

    #[test]
    fn rejects_hdf5_and_garbage() {
        let mut bytes = vec![b' '; HEADER_LEN];
        bytes[..19].copy_from_slice(b"MATLAB 7.3 MAT-file");
        assert!(matches!(MatFile::from_bytes(&bytes), Err(MatError::Hdf5Unsupported)));

        assert!(matches!(MatFile::from_bytes(b"short"), Err(MatError::BadHeader(_))));

        let mut truncated = MatFile::new();
        truncated.insert("x", MatArray::scalar(1.0));
        let bytes = truncated.to_bytes();
        assert!(matches!(
            MatFile::from_bytes(&bytes[..bytes.len() - 12]),
            Err(MatError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_dimensions_are_malformed() {
        let huge = MatArray {
            class: MatClass::Double,
            dims: vec![1 << 22, 1 << 21, 1 << 21],
            real: Vec::new(),
        };
        let mut bytes = header();
        bytes.extend_from_slice(&encode_matrix_element("data", &huge));
        assert!(matches!(MatFile::from_bytes(&bytes), Err(MatError::Malformed(_))));
    }

    #[test]
    fn scalar_accessor_checks_shape() {
        let mut file = MatFile::new();
        file.insert("data", MatArray::from_array3(&sample_trials()));
        assert!(matches!(file.scalar("data"), Err(MatError::Shape { .. })));
        assert!(matches!(file.scalar("nope"), Err(MatError::MissingVariable(_))));
    }
}
