#![doc = include_str!("../../../README.md")]
mod bytecode;
mod class;
mod coerce;
mod context;
mod domain;
mod error;
mod heap;
mod method;
mod multiname;
mod object;
mod pool;
mod value;

pub use crate::{
    bytecode::{BodyBuilder, Interpreter, Label, Opcode, Return},
    class::{ClassDef, ClassId, ClassKind, ClassTable, TraitDef, TraitKind, TypeRef},
    context::{AbcContext, CallContext, ScopeEntry},
    domain::ApplicationDomain,
    error::{ErrorKind, RunResult, VmError},
    heap::{Heap, HeapData, HeapId},
    method::{EarlyBinding, ExceptionHandler, MethodBody, MethodId, MethodInfo},
    multiname::Multiname,
    object::{ArrayData, FunctionObject, Namespace, QName, ScriptObject},
    pool::{ConstantPool, MnKind, MultinameInfo, NamespaceInfo, NsKind, StringId},
    value::{Number, Value},
};
