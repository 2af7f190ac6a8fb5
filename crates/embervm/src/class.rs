//! The class table: builtin and host-defined classes, type references, and
//! the coercion behavior attached to each type.
//!
//! Classes are owned by the table for the lifetime of the ABC context and are
//! never reference counted; `Value::Class` is an immediate tag.

use ahash::AHashMap;

use crate::{
    coerce,
    error::{RunResult, VmError, K_CHECK_TYPE_FAILED},
    heap::{Heap, HeapData},
    method::MethodId,
    pool::ConstantPool,
    value::Value,
};

/// Index of a class in the [`ClassTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    pub const OBJECT: ClassId = ClassId(0);
    pub const INT: ClassId = ClassId(1);
    pub const UINT: ClassId = ClassId(2);
    pub const NUMBER: ClassId = ClassId(3);
    pub const BOOLEAN: ClassId = ClassId(4);
    pub const STRING: ClassId = ClassId(5);
    pub const ARRAY: ClassId = ClassId(6);
    pub const FUNCTION: ClassId = ClassId(7);
    pub const NAMESPACE: ClassId = ClassId(8);
    pub const QNAME: ClassId = ClassId(9);
    pub const CLASS: ClassId = ClassId(10);
    pub const VECTOR: ClassId = ClassId(11);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw table index, as encoded in the `newclass` operand.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Coercion behavior of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Object,
    Int,
    UInt,
    Number,
    Boolean,
    String,
    Array,
    Function,
    Namespace,
    QName,
    Class,
    /// A parameterized template (Vector); instantiated via
    /// `constructgenerictype`.
    Template,
    /// Host- or script-defined class with reference semantics.
    Custom,
}

/// Kind of a declared trait.
#[derive(Debug, Clone, Copy)]
pub enum TraitKind {
    /// A typed storage slot; `is_const` slots reject `setproperty` but accept
    /// `initproperty`.
    Slot { type_ref: TypeRef, is_const: bool },
    /// A method bound at call time.
    Method(MethodId),
}

/// A trait declared by a class for its instances.
#[derive(Debug, Clone)]
pub struct TraitDef {
    pub name: String,
    /// 1-based slot id for slot traits; 0 for methods.
    pub slot_id: u32,
    pub kind: TraitKind,
}

/// A class definition.
#[derive(Debug)]
pub struct ClassDef {
    pub name: String,
    pub super_id: Option<ClassId>,
    pub kind: ClassKind,
    pub instance_traits: Vec<TraitDef>,
    pub constructor: Option<MethodId>,
}

/// Something a value can be coerced to: the any type, void, or a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    Any,
    Void,
    Class(ClassId),
}

/// Registry of every class known to an ABC context.
#[derive(Debug)]
pub struct ClassTable {
    defs: Vec<ClassDef>,
    by_name: AHashMap<String, ClassId>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ClassTable {
    /// Builds a table pre-populated with the builtin classes at their fixed
    /// ids.
    pub fn with_builtins() -> Self {
        let mut table = Self {
            defs: Vec::new(),
            by_name: AHashMap::new(),
        };
        let builtins: &[(&str, ClassKind)] = &[
            ("Object", ClassKind::Object),
            ("int", ClassKind::Int),
            ("uint", ClassKind::UInt),
            ("Number", ClassKind::Number),
            ("Boolean", ClassKind::Boolean),
            ("String", ClassKind::String),
            ("Array", ClassKind::Array),
            ("Function", ClassKind::Function),
            ("Namespace", ClassKind::Namespace),
            ("QName", ClassKind::QName),
            ("Class", ClassKind::Class),
            ("Vector", ClassKind::Template),
        ];
        for (i, (name, kind)) in builtins.iter().enumerate() {
            let super_id = if i == 0 { None } else { Some(ClassId::OBJECT) };
            table.push_def(ClassDef {
                name: (*name).to_owned(),
                super_id,
                kind: *kind,
                instance_traits: Vec::new(),
                constructor: None,
            });
        }
        table
    }

    fn push_def(&mut self, def: ClassDef) -> ClassId {
        let id = ClassId(u32::try_from(self.defs.len()).expect("class table overflow"));
        self.by_name.insert(def.name.clone(), id);
        self.defs.push(def);
        id
    }

    /// Registers a script- or host-defined class.
    pub fn define(&mut self, def: ClassDef) -> ClassId {
        self.push_def(def)
    }

    #[must_use]
    pub fn get(&self, id: ClassId) -> &ClassDef {
        &self.defs[id.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Resolves a type name to a type reference. `*` is the any type.
    pub fn resolve_type(&self, name: &str) -> Option<TypeRef> {
        match name {
            "*" | "" => Some(TypeRef::Any),
            "void" => Some(TypeRef::Void),
            _ => self.by_name(name).map(TypeRef::Class),
        }
    }

    /// Applies type parameters to a template class, producing (or reusing)
    /// the specialized class, e.g. `Vector.<int>`.
    pub fn apply_template(&mut self, template: ClassId, params: &[TypeRef]) -> ClassId {
        let mut name = self.get(template).name.clone();
        name.push_str(".<");
        for (i, p) in params.iter().enumerate() {
            if i > 0 {
                name.push(',');
            }
            match p {
                TypeRef::Any => name.push('*'),
                TypeRef::Void => name.push_str("void"),
                TypeRef::Class(c) => name.push_str(&self.get(*c).name),
            }
        }
        name.push('>');
        if let Some(existing) = self.by_name(&name) {
            return existing;
        }
        self.push_def(ClassDef {
            name,
            super_id: Some(ClassId::OBJECT),
            kind: ClassKind::Array,
            instance_traits: Vec::new(),
            constructor: None,
        })
    }

    /// True when `sub` equals `sup` or `sup` appears in `sub`'s super chain.
    pub fn is_subclass(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut cur = Some(sub);
        while let Some(id) = cur {
            if id == sup {
                return true;
            }
            cur = self.get(id).super_id;
        }
        false
    }

    /// The class of a runtime value, used by `istype`/`instanceof` and the
    /// object-class coercions. Null and Undefined have no class.
    pub fn class_of(&self, value: &Value, heap: &Heap) -> Option<ClassId> {
        match value {
            Value::Undefined | Value::Null => None,
            Value::Bool(_) => Some(ClassId::BOOLEAN),
            Value::Int(_) => Some(ClassId::INT),
            Value::UInt(_) => Some(ClassId::UINT),
            Value::Number(_) => Some(ClassId::NUMBER),
            Value::InternString(_) => Some(ClassId::STRING),
            Value::Class(_) => Some(ClassId::CLASS),
            Value::Ref(id) => Some(match heap.get(*id) {
                HeapData::Str(_) => ClassId::STRING,
                HeapData::Namespace(_) => ClassId::NAMESPACE,
                HeapData::QName(_) => ClassId::QNAME,
                HeapData::Array(_) => ClassId::ARRAY,
                HeapData::Function(_) => ClassId::FUNCTION,
                HeapData::Object(o) => o.class.unwrap_or(ClassId::OBJECT),
            }),
        }
    }

    /// The `is` operator: type membership without conversion.
    pub fn is_type(&self, type_ref: TypeRef, value: &Value, heap: &Heap) -> bool {
        match type_ref {
            TypeRef::Any => true,
            TypeRef::Void => value.is_undefined(),
            TypeRef::Class(cid) => match self.get(cid).kind {
                ClassKind::Number => value.is_integral() || value.is_number(),
                ClassKind::Int => match value {
                    Value::Int(_) => true,
                    Value::UInt(u) => *u <= i32::MAX as u32,
                    Value::Number(n) => {
                        n.value.is_finite()
                            && n.value.fract() == 0.0
                            && n.value >= f64::from(i32::MIN)
                            && n.value <= f64::from(i32::MAX)
                    }
                    _ => false,
                },
                ClassKind::UInt => match value {
                    Value::Int(i) => *i >= 0,
                    Value::UInt(_) => true,
                    Value::Number(n) => {
                        n.value.is_finite()
                            && n.value.fract() == 0.0
                            && n.value >= 0.0
                            && n.value <= f64::from(u32::MAX)
                    }
                    _ => false,
                },
                ClassKind::Boolean => value.is_boolean(),
                ClassKind::String => value.is_string(heap),
                ClassKind::Object => !value.is_undefined() && !value.is_null(),
                _ => match self.class_of(value, heap) {
                    Some(vc) => self.is_subclass(vc, cid),
                    None => false,
                },
            },
        }
    }

    /// Converts `value` to an instance of `type_ref`, consuming one reference
    /// of the input and returning an owned result.
    ///
    /// Raises TypeError 1034 when the value cannot be represented in the
    /// target type.
    pub fn coerce(
        &self,
        type_ref: TypeRef,
        value: Value,
        heap: &mut Heap,
        pool: &ConstantPool,
    ) -> RunResult<Value> {
        let cid = match type_ref {
            TypeRef::Any | TypeRef::Void => return Ok(value),
            TypeRef::Class(cid) => cid,
        };
        match self.get(cid).kind {
            ClassKind::Int => {
                if value.is_integer() {
                    return Ok(value);
                }
                let n = coerce::to_int32(&value, heap, pool);
                value.drop_with_heap(heap);
                Ok(Value::Int(n))
            }
            ClassKind::UInt => {
                if value.is_uinteger() {
                    return Ok(value);
                }
                let n = coerce::to_uint32(&value, heap, pool);
                value.drop_with_heap(heap);
                Ok(Value::UInt(n))
            }
            ClassKind::Number => match value {
                Value::Number(_) => Ok(value),
                Value::Int(i) => Ok(Value::abstract_di(i64::from(i))),
                Value::UInt(u) => Ok(Value::abstract_di(i64::from(u))),
                other => {
                    let n = coerce::to_number(&other, heap, pool);
                    other.drop_with_heap(heap);
                    Ok(Value::abstract_d(n))
                }
            },
            ClassKind::Boolean => {
                if value.is_boolean() {
                    return Ok(value);
                }
                let b = coerce::to_boolean(&value, heap, pool);
                value.drop_with_heap(heap);
                Ok(Value::Bool(b))
            }
            ClassKind::String => match value {
                Value::Null | Value::Undefined => Ok(Value::Null),
                v if v.is_string(heap) => Ok(v),
                other => {
                    let s = coerce::to_avm_string(&other, heap, pool, self);
                    other.drop_with_heap(heap);
                    Ok(Value::abstract_s(heap, s))
                }
            },
            ClassKind::Object => match value {
                Value::Undefined => Ok(Value::Null),
                other => Ok(other),
            },
            _ => match value {
                Value::Null | Value::Undefined => Ok(Value::Null),
                other => {
                    let matches = self
                        .class_of(&other, heap)
                        .is_some_and(|vc| self.is_subclass(vc, cid));
                    if matches {
                        Ok(other)
                    } else {
                        let desc = other.to_debug_string(heap, pool);
                        let err = VmError::type_error(
                            K_CHECK_TYPE_FAILED,
                            format!("Type Coercion failed: cannot convert {desc} to {}", self.get(cid).name),
                        );
                        other.drop_with_heap(heap);
                        Err(err)
                    }
                }
            },
        }
    }

    /// Finds a declared instance trait by name, walking the super chain.
    pub fn find_trait(&self, class: ClassId, name: &str) -> Option<&TraitDef> {
        let mut cur = Some(class);
        while let Some(id) = cur {
            if let Some(t) = self.get(id).instance_traits.iter().find(|t| t.name == name) {
                return Some(t);
            }
            cur = self.get(id).super_id;
        }
        None
    }

    /// Like [`Self::find_trait`] but starts the walk at the superclass of
    /// `class`; used by `getsuper`/`callsuper`.
    pub fn find_super_trait(&self, class: ClassId, name: &str) -> Option<&TraitDef> {
        self.get(class).super_id.and_then(|s| self.find_trait(s, name))
    }

    /// Total number of declared instance slots, super chain included. Sized
    /// when instantiating.
    pub fn instance_slot_count(&self, class: ClassId) -> usize {
        let mut max = 0;
        let mut cur = Some(class);
        while let Some(id) = cur {
            for t in &self.get(id).instance_traits {
                if matches!(t.kind, TraitKind::Slot { .. }) {
                    max = max.max(t.slot_id as usize);
                }
            }
            cur = self.get(id).super_id;
        }
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ids_are_stable() {
        let table = ClassTable::with_builtins();
        assert_eq!(table.by_name("int"), Some(ClassId::INT));
        assert_eq!(table.by_name("Number"), Some(ClassId::NUMBER));
        assert_eq!(table.by_name("Vector"), Some(ClassId::VECTOR));
    }

    #[test]
    fn integral_double_is_int() {
        let table = ClassTable::with_builtins();
        let heap = Heap::new();
        assert!(table.is_type(TypeRef::Class(ClassId::INT), &Value::abstract_d(5.0), &heap));
        assert!(!table.is_type(TypeRef::Class(ClassId::INT), &Value::abstract_d(5.5), &heap));
        assert!(!table.is_type(TypeRef::Class(ClassId::UINT), &Value::Int(-1), &heap));
    }

    #[test]
    fn template_application_is_cached() {
        let mut table = ClassTable::with_builtins();
        let a = table.apply_template(ClassId::VECTOR, &[TypeRef::Class(ClassId::INT)]);
        let b = table.apply_template(ClassId::VECTOR, &[TypeRef::Class(ClassId::INT)]);
        assert_eq!(a, b);
        assert_eq!(table.get(a).name, "Vector.<int>");
    }

    #[test]
    fn coerce_string_maps_undefined_to_null() {
        let table = ClassTable::with_builtins();
        let mut heap = Heap::new();
        let pool = ConstantPool::new();
        let out = table
            .coerce(TypeRef::Class(ClassId::STRING), Value::Undefined, &mut heap, &pool)
            .unwrap();
        assert!(out.is_null());
    }
}
