//! The ABC constant pool: numeric literals, interned strings, namespaces,
//! and multinames.

use ahash::AHashMap;

/// Index of an interned string in the constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringId(pub(crate) u32);

impl StringId {
    /// The empty string, present in every pool at index 0.
    pub const EMPTY: StringId = StringId(0);
}

/// Namespace kind, following the ABC constant tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsKind {
    Namespace,
    Package,
    PackageInternal,
    Protected,
    Explicit,
    StaticProtected,
    Private,
}

/// A namespace constant.
#[derive(Debug, Clone, Copy)]
pub struct NamespaceInfo {
    pub kind: NsKind,
    pub uri: StringId,
}

/// Multiname kind, following the ABC constant tags. The `RT` variants take
/// one or both of their components from the operand stack at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnKind {
    /// Fixed namespace and name.
    QName,
    /// Name fixed, namespace popped from the stack.
    RtqName,
    /// Namespace and name both popped from the stack.
    RtqNameL,
    /// Fixed namespace set and name.
    Multiname,
    /// Namespace set fixed, name popped from the stack.
    MultinameL,
}

/// A multiname constant. `name` is `None` for the late (`..L`) kinds and for
/// the any-name (`*`) entry at index 0.
#[derive(Debug, Clone)]
pub struct MultinameInfo {
    pub kind: MnKind,
    pub name: Option<StringId>,
    pub ns: Option<u32>,
    pub ns_set: Vec<u32>,
    pub attribute: bool,
}

/// The constant pool shared by every method of an ABC context.
///
/// Entry 0 of each table is the conventional default: integer 0, uint 0,
/// NaN, the empty string, the public namespace, and the any-name multiname.
#[derive(Debug)]
pub struct ConstantPool {
    ints: Vec<i32>,
    uints: Vec<u32>,
    doubles: Vec<f64>,
    strings: Vec<String>,
    string_map: AHashMap<String, StringId>,
    namespaces: Vec<NamespaceInfo>,
    multinames: Vec<MultinameInfo>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        let mut pool = Self {
            ints: vec![0],
            uints: vec![0],
            doubles: vec![f64::NAN],
            strings: Vec::new(),
            string_map: AHashMap::new(),
            namespaces: Vec::new(),
            multinames: Vec::new(),
        };
        let empty = pool.intern("");
        debug_assert_eq!(empty, StringId::EMPTY);
        pool.namespaces.push(NamespaceInfo {
            kind: NsKind::Package,
            uri: StringId::EMPTY,
        });
        pool.multinames.push(MultinameInfo {
            kind: MnKind::QName,
            name: None,
            ns: Some(0),
            ns_set: Vec::new(),
            attribute: false,
        });
        pool
    }

    // --- strings ----------------------------------------------------------

    /// Interns a string, returning the existing id when already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.string_map.get(s) {
            return *id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("constant pool string overflow"));
        self.strings.push(s.to_owned());
        self.string_map.insert(s.to_owned(), id);
        id
    }

    #[must_use]
    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id.0 as usize]
    }

    // --- numeric constants ------------------------------------------------

    pub fn add_int(&mut self, v: i32) -> u32 {
        self.ints.push(v);
        (self.ints.len() - 1) as u32
    }

    pub fn add_uint(&mut self, v: u32) -> u32 {
        self.uints.push(v);
        (self.uints.len() - 1) as u32
    }

    pub fn add_double(&mut self, v: f64) -> u32 {
        self.doubles.push(v);
        (self.doubles.len() - 1) as u32
    }

    pub fn int(&self, index: u32) -> Option<i32> {
        self.ints.get(index as usize).copied()
    }

    pub fn uint(&self, index: u32) -> Option<u32> {
        self.uints.get(index as usize).copied()
    }

    pub fn double(&self, index: u32) -> Option<f64> {
        self.doubles.get(index as usize).copied()
    }

    // --- strings by pool index (for pushstring) ---------------------------

    /// Adds a string constant, returning its pool index for `pushstring`.
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.intern(s).0
    }

    pub fn string_at(&self, index: u32) -> Option<StringId> {
        if (index as usize) < self.strings.len() {
            Some(StringId(index))
        } else {
            None
        }
    }

    // --- namespaces -------------------------------------------------------

    pub fn add_namespace(&mut self, kind: NsKind, uri: &str) -> u32 {
        let uri = self.intern(uri);
        self.namespaces.push(NamespaceInfo { kind, uri });
        (self.namespaces.len() - 1) as u32
    }

    pub fn namespace(&self, index: u32) -> Option<&NamespaceInfo> {
        self.namespaces.get(index as usize)
    }

    // --- multinames -------------------------------------------------------

    /// Adds a QName multiname in the public namespace. The common case for
    /// builder-assembled bytecode.
    pub fn add_qname(&mut self, name: &str) -> u32 {
        let name = self.intern(name);
        self.add_multiname(MultinameInfo {
            kind: MnKind::QName,
            name: Some(name),
            ns: Some(0),
            ns_set: Vec::new(),
            attribute: false,
        })
    }

    pub fn add_multiname(&mut self, info: MultinameInfo) -> u32 {
        self.multinames.push(info);
        (self.multinames.len() - 1) as u32
    }

    pub fn multiname(&self, index: u32) -> Option<&MultinameInfo> {
        self.multinames.get(index as usize)
    }
}
