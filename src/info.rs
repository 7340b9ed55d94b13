//! Values returned by the `*_info` queries

use crate::types::*;

/// A single info query result
///
/// The variant mirrors the C type the legacy API writes for the queried key,
/// so [`InfoValue::to_bytes`] produces exactly the bytes a C caller expects.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Int(cl_int),
    Uint(cl_uint),
    Ulong(cl_ulong),
    Size(usize),
    SizeArray(Vec<usize>),
    Bool(bool),
    Bitfield(cl_bitfield),
    String(String),
    /// A single handle (null as 0)
    Handle(u64),
    Handles(Vec<u64>),
    /// Context properties list (zero-terminated when non-empty)
    Properties(Vec<isize>),
}

impl InfoValue {
    pub fn as_uint(&self) -> Option<cl_uint> {
        match self {
            InfoValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<cl_int> {
        match self {
            InfoValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ulong(&self) -> Option<cl_ulong> {
        match self {
            InfoValue::Ulong(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_size(&self) -> Option<usize> {
        match self {
            InfoValue::Size(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<u64> {
        match self {
            InfoValue::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_handles(&self) -> Option<&[u64]> {
        match self {
            InfoValue::Handles(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_bitfield(&self) -> Option<cl_bitfield> {
        match self {
            InfoValue::Bitfield(v) => Some(*v),
            _ => None,
        }
    }

    /// Native-endian encoding as written by the C entry points
    ///
    /// Strings are NUL-terminated; handles are pointer-sized.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            InfoValue::Int(v) => v.to_ne_bytes().to_vec(),
            InfoValue::Uint(v) => v.to_ne_bytes().to_vec(),
            InfoValue::Ulong(v) => v.to_ne_bytes().to_vec(),
            InfoValue::Size(v) => v.to_ne_bytes().to_vec(),
            InfoValue::SizeArray(values) => values.iter().flat_map(|v| v.to_ne_bytes()).collect(),
            InfoValue::Bool(b) => (if *b { CL_TRUE } else { CL_FALSE }).to_ne_bytes().to_vec(),
            InfoValue::Bitfield(v) => v.to_ne_bytes().to_vec(),
            InfoValue::String(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            InfoValue::Handle(h) => (*h as usize).to_ne_bytes().to_vec(),
            InfoValue::Handles(handles) => handles
                .iter()
                .flat_map(|h| (*h as usize).to_ne_bytes())
                .collect(),
            InfoValue::Properties(props) => {
                let mut bytes: Vec<u8> = props.iter().flat_map(|p| p.to_ne_bytes()).collect();
                if !props.is_empty() {
                    bytes.extend_from_slice(&0isize.to_ne_bytes());
                }
                bytes
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_is_nul_terminated() {
        let bytes = InfoValue::String("abc".into()).to_bytes();
        assert_eq!(bytes, b"abc\0");
    }

    #[test]
    fn test_bool_encodes_as_cl_bool() {
        assert_eq!(InfoValue::Bool(true).to_bytes(), 1u32.to_ne_bytes());
    }

    #[test]
    fn test_handles_are_pointer_sized() {
        let bytes = InfoValue::Handles(vec![1, 2]).to_bytes();
        assert_eq!(bytes.len(), 2 * std::mem::size_of::<usize>());
    }

    #[test]
    fn test_empty_properties_encode_to_nothing() {
        assert!(InfoValue::Properties(vec![]).to_bytes().is_empty());
        assert_eq!(
            InfoValue::Properties(vec![0x1084, 1]).to_bytes().len(),
            3 * std::mem::size_of::<isize>()
        );
    }
}
