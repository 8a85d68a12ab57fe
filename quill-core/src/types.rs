//! Type registry for Quill expressions.
//!
//! Every `Type` is a reference to a canonical, immutable `TypeKind`.
//! Atomic kinds live in statics and array kinds are interned in a
//! process-wide cache, so two `Type` values are equal exactly when
//! they point at the same `TypeKind`. Comparison never walks the
//! structure.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Structure of a type.
///
/// Array element types are always non-array: nested arrays are
/// folded into the dimension count when interned.
#[derive(Debug, PartialEq, Eq)]
pub enum TypeKind {
    Integer,
    Boolean,
    String,
    /// Result of runtime calls that produce no value.
    Void,
    /// Placeholder until type inference has run.
    Unknown,
    Array { element: Type, dimension: u32 },
}

/// Handle to a canonical type instance.
#[derive(Clone, Copy)]
pub struct Type(&'static TypeKind);

static INTEGER: TypeKind = TypeKind::Integer;
static BOOLEAN: TypeKind = TypeKind::Boolean;
static STRING: TypeKind = TypeKind::String;
static VOID: TypeKind = TypeKind::Void;
static UNKNOWN: TypeKind = TypeKind::Unknown;

static ARRAY_TYPES: LazyLock<Mutex<FxHashMap<(Type, u32), Type>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

impl Type {
    pub const INTEGER: Type = Type(&INTEGER);
    pub const BOOLEAN: Type = Type(&BOOLEAN);
    pub const STRING: Type = Type(&STRING);
    pub const VOID: Type = Type(&VOID);
    pub const UNKNOWN: Type = Type(&UNKNOWN);

    /// Return the canonical array type with the given element type and
    /// dimensionality.
    ///
    /// An array element type is flattened, so `array(array(int, 1), 2)`
    /// is the same instance as `array(int, 3)`.
    ///
    /// # Panics
    ///
    /// Panics if `dimension` is zero.
    pub fn array(element: Type, dimension: u32) -> Type {
        assert!(dimension > 0, "array types need at least one dimension");

        let (element, dimension) = match element.kind() {
            TypeKind::Array {
                element: inner,
                dimension: inner_dimension,
            } => (*inner, inner_dimension + dimension),
            _ => (element, dimension),
        };

        let mut cache = ARRAY_TYPES.lock();
        *cache.entry((element, dimension)).or_insert_with(|| {
            Type(Box::leak(Box::new(TypeKind::Array { element, dimension })))
        })
    }

    pub fn kind(self) -> &'static TypeKind {
        self.0
    }

    pub fn is_array(self) -> bool {
        matches!(self.0, TypeKind::Array { .. })
    }

    pub fn is_unknown(self) -> bool {
        matches!(self.0, TypeKind::Unknown)
    }

    pub fn is_void(self) -> bool {
        matches!(self.0, TypeKind::Void)
    }

    /// Atomic element type of an array type.
    pub fn element(self) -> Option<Type> {
        match self.0 {
            TypeKind::Array { element, .. } => Some(*element),
            _ => None,
        }
    }

    /// Number of array dimensions; zero for non-array types.
    pub fn dimension(self) -> u32 {
        match self.0 {
            TypeKind::Array { dimension, .. } => *dimension,
            _ => 0,
        }
    }

    /// Type produced by applying `count` subscripts to a value of this type.
    pub fn subscripted(self, count: usize) -> Option<Type> {
        if count == 0 {
            return Some(self);
        }
        let TypeKind::Array { element, dimension } = self.0 else {
            return None;
        };
        let count = u32::try_from(count).ok()?;
        match dimension.checked_sub(count)? {
            0 => Some(*element),
            rest => Some(Type::array(*element, rest)),
        }
    }

    /// One-dimension-larger array type with `self` as its elements.
    pub fn wrapped_in_array(self) -> Type {
        Type::array(self, 1)
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({self})")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            TypeKind::Integer => f.write_str("int"),
            TypeKind::Boolean => f.write_str("bool"),
            TypeKind::String => f.write_str("string"),
            TypeKind::Void => f.write_str("void"),
            TypeKind::Unknown => f.write_str("unknown"),
            TypeKind::Array { element, dimension } => {
                write!(f, "{element}")?;
                for _ in 0..*dimension {
                    f.write_str("[]")?;
                }
                Ok(())
            }
        }
    }
}
