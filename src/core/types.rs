//! The type system of the IR.
//!
//! Types are immutable, reference-counted and structurally compared; the
//! hash is computed once at construction so that equality checks and the
//! total order are cheap. Struct types are name-compatible: two struct
//! types are equal iff they share the same declaration handle.

use lazy_static::lazy_static;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Size tag for floating-point types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatSize {
    Half,
    Single,
    Double,
    Quad,
}

impl FloatSize {
    pub fn nbits(&self) -> usize {
        match self {
            FloatSize::Half => 16,
            FloatSize::Single => 32,
            FloatSize::Double => 64,
            FloatSize::Quad => 128,
        }
    }
}

/// An immutable struct declaration. Struct types referencing the same
/// declaration are compatible; structurally identical but separately
/// declared structs are not.
#[derive(Debug)]
pub struct StructDeclaration {
    name: Option<String>,
    elements: Vec<Type>,
    packed: bool,
}

impl StructDeclaration {
    pub fn create(name: Option<&str>, elements: Vec<Type>, packed: bool) -> Arc<StructDeclaration> {
        Arc::new(StructDeclaration {
            name: name.map(|s| s.to_string()),
            elements,
            packed,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn elements(&self) -> &[Type] {
        &self.elements
    }

    pub fn packed(&self) -> bool {
        self.packed
    }
}

/// The concrete shape of a type.
#[derive(Clone, Debug)]
pub enum TypeKind {
    /// Bitstring type of the given width.
    Bit(usize),
    Float(FloatSize),
    Pointer,
    Array { element: Type, nelements: usize },
    Struct(Arc<StructDeclaration>),
    Vector {
        element: Type,
        nelements: usize,
        scalable: bool,
    },
    /// Opaque memory sequencing token.
    Memory,
    /// Opaque I/O sequencing token.
    Io,
    /// Unit state used to enforce execution ordering where no data flows.
    Trigger,
    /// Control type with the given number of alternatives.
    Control(usize),
    Function {
        arguments: Vec<Type>,
        results: Vec<Type>,
    },
}

struct TypeInner {
    kind: TypeKind,
    hash: u64,
}

/// A shared handle to an immutable type.
#[derive(Clone)]
pub struct Type {
    inner: Arc<TypeInner>,
}

fn hash_kind<H: Hasher>(kind: &TypeKind, state: &mut H) {
    std::mem::discriminant(kind).hash(state);
    match kind {
        TypeKind::Bit(n) => n.hash(state),
        TypeKind::Float(size) => size.hash(state),
        TypeKind::Pointer | TypeKind::Memory | TypeKind::Io | TypeKind::Trigger => {}
        TypeKind::Array { element, nelements } => {
            element.hash_value().hash(state);
            nelements.hash(state);
        }
        TypeKind::Struct(decl) => {
            (Arc::as_ptr(decl) as usize).hash(state);
        }
        TypeKind::Vector {
            element,
            nelements,
            scalable,
        } => {
            element.hash_value().hash(state);
            nelements.hash(state);
            scalable.hash(state);
        }
        TypeKind::Control(n) => n.hash(state),
        TypeKind::Function { arguments, results } => {
            arguments.len().hash(state);
            for a in arguments {
                a.hash_value().hash(state);
            }
            results.len().hash(state);
            for r in results {
                r.hash_value().hash(state);
            }
        }
    }
}

fn kinds_equal(a: &TypeKind, b: &TypeKind) -> bool {
    match (a, b) {
        (TypeKind::Bit(x), TypeKind::Bit(y)) => x == y,
        (TypeKind::Float(x), TypeKind::Float(y)) => x == y,
        (TypeKind::Pointer, TypeKind::Pointer)
        | (TypeKind::Memory, TypeKind::Memory)
        | (TypeKind::Io, TypeKind::Io)
        | (TypeKind::Trigger, TypeKind::Trigger) => true,
        (
            TypeKind::Array {
                element: e1,
                nelements: n1,
            },
            TypeKind::Array {
                element: e2,
                nelements: n2,
            },
        ) => n1 == n2 && e1 == e2,
        (TypeKind::Struct(d1), TypeKind::Struct(d2)) => Arc::ptr_eq(d1, d2),
        (
            TypeKind::Vector {
                element: e1,
                nelements: n1,
                scalable: s1,
            },
            TypeKind::Vector {
                element: e2,
                nelements: n2,
                scalable: s2,
            },
        ) => n1 == n2 && s1 == s2 && e1 == e2,
        (TypeKind::Control(x), TypeKind::Control(y)) => x == y,
        (
            TypeKind::Function {
                arguments: a1,
                results: r1,
            },
            TypeKind::Function {
                arguments: a2,
                results: r2,
            },
        ) => a1 == a2 && r1 == r2,
        _ => false,
    }
}

impl Type {
    fn construct(kind: TypeKind) -> Type {
        let mut hasher = DefaultHasher::new();
        hash_kind(&kind, &mut hasher);
        let hash = hasher.finish();
        Type {
            inner: Arc::new(TypeInner { kind, hash }),
        }
    }

    pub fn bit(nbits: usize) -> Type {
        assert!(nbits > 0, "bit type requires a non-zero width");
        match nbits {
            1 => BIT1.clone(),
            8 => BIT8.clone(),
            16 => BIT16.clone(),
            32 => BIT32.clone(),
            64 => BIT64.clone(),
            _ => Type::construct(TypeKind::Bit(nbits)),
        }
    }

    pub fn float(size: FloatSize) -> Type {
        Type::construct(TypeKind::Float(size))
    }

    pub fn pointer() -> Type {
        POINTER.clone()
    }

    pub fn array(element: Type, nelements: usize) -> Type {
        Type::construct(TypeKind::Array { element, nelements })
    }

    pub fn strct(declaration: Arc<StructDeclaration>) -> Type {
        Type::construct(TypeKind::Struct(declaration))
    }

    pub fn vector(element: Type, nelements: usize) -> Type {
        Type::construct(TypeKind::Vector {
            element,
            nelements,
            scalable: false,
        })
    }

    pub fn scalable_vector(element: Type, nelements: usize) -> Type {
        Type::construct(TypeKind::Vector {
            element,
            nelements,
            scalable: true,
        })
    }

    pub fn memory_state() -> Type {
        MEMORY.clone()
    }

    pub fn io_state() -> Type {
        IO.clone()
    }

    pub fn trigger() -> Type {
        TRIGGER.clone()
    }

    pub fn control(nalternatives: usize) -> Type {
        assert!(
            nalternatives >= 2,
            "control type requires at least two alternatives"
        );
        // small control types are shared process-wide
        match nalternatives {
            2 => CONTROL2.clone(),
            3 => CONTROL3.clone(),
            _ => Type::construct(TypeKind::Control(nalternatives)),
        }
    }

    pub fn function(arguments: Vec<Type>, results: Vec<Type>) -> Type {
        Type::construct(TypeKind::Function { arguments, results })
    }

    pub fn kind(&self) -> &TypeKind {
        &self.inner.kind
    }

    pub fn hash_value(&self) -> u64 {
        self.inner.hash
    }

    pub fn is_value_type(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::Bit(_)
                | TypeKind::Float(_)
                | TypeKind::Pointer
                | TypeKind::Array { .. }
                | TypeKind::Struct(_)
                | TypeKind::Vector { .. }
        )
    }

    pub fn is_state_type(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::Memory | TypeKind::Io | TypeKind::Trigger | TypeKind::Control(_)
        )
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind(), TypeKind::Pointer)
    }

    pub fn is_memory_state(&self) -> bool {
        matches!(self.kind(), TypeKind::Memory)
    }

    pub fn is_io_state(&self) -> bool {
        matches!(self.kind(), TypeKind::Io)
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind(), TypeKind::Function { .. })
    }

    /// The number of alternatives if this is a control type.
    pub fn nalternatives(&self) -> Option<usize> {
        match self.kind() {
            TypeKind::Control(n) => Some(*n),
            _ => None,
        }
    }

    pub fn function_arguments(&self) -> Option<&[Type]> {
        match self.kind() {
            TypeKind::Function { arguments, .. } => Some(arguments),
            _ => None,
        }
    }

    pub fn function_results(&self) -> Option<&[Type]> {
        match self.kind() {
            TypeKind::Function { results, .. } => Some(results),
            _ => None,
        }
    }

    pub fn debug_string(&self) -> String {
        match self.kind() {
            TypeKind::Bit(n) => format!("bit{}", n),
            TypeKind::Float(size) => format!("flt{}", size.nbits()),
            TypeKind::Pointer => "ptr".to_string(),
            TypeKind::Array { element, nelements } => {
                format!("[{} x {}]", nelements, element.debug_string())
            }
            TypeKind::Struct(decl) => match decl.name() {
                Some(name) => format!("struct<{}>", name),
                None => "struct<anon>".to_string(),
            },
            TypeKind::Vector {
                element,
                nelements,
                scalable,
            } => {
                let tag = if *scalable { "vscale x " } else { "" };
                format!("vec<{}{} x {}>", tag, nelements, element.debug_string())
            }
            TypeKind::Memory => "mem".to_string(),
            TypeKind::Io => "io".to_string(),
            TypeKind::Trigger => "trig".to_string(),
            TypeKind::Control(n) => format!("ctl{}", n),
            TypeKind::Function { arguments, results } => {
                let args: Vec<String> = arguments.iter().map(|t| t.debug_string()).collect();
                let ress: Vec<String> = results.iter().map(|t| t.debug_string()).collect();
                format!("fn({}) -> ({})", args.join(", "), ress.join(", "))
            }
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.inner.hash == other.inner.hash && kinds_equal(&self.inner.kind, &other.inner.kind)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

impl PartialOrd for Type {
    fn partial_cmp(&self, other: &Type) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Type {
    fn cmp(&self, other: &Type) -> Ordering {
        self.inner
            .hash
            .cmp(&other.inner.hash)
            .then_with(|| self.debug_string().cmp(&other.debug_string()))
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.debug_string())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.debug_string())
    }
}

// Process-wide pool for the small types that are requested constantly.
lazy_static! {
    static ref BIT1: Type = Type::construct(TypeKind::Bit(1));
    static ref BIT8: Type = Type::construct(TypeKind::Bit(8));
    static ref BIT16: Type = Type::construct(TypeKind::Bit(16));
    static ref BIT32: Type = Type::construct(TypeKind::Bit(32));
    static ref BIT64: Type = Type::construct(TypeKind::Bit(64));
    static ref POINTER: Type = Type::construct(TypeKind::Pointer);
    static ref MEMORY: Type = Type::construct(TypeKind::Memory);
    static ref IO: Type = Type::construct(TypeKind::Io);
    static ref TRIGGER: Type = Type::construct(TypeKind::Trigger);
    static ref CONTROL2: Type = Type::construct(TypeKind::Control(2));
    static ref CONTROL3: Type = Type::construct(TypeKind::Control(3));
}
