use std::mem::size_of;

use super::{
    object_bound_method::ObjectBoundMethod,
    object_class::{ObjectClass, ObjectInstance},
    object_closure::ObjectClosure,
    object_function::ObjectFunction,
    object_native_function::ObjectNativeFunction,
    object_string::ObjectString,
    object_upvalue::ObjectUpvalue,
};
use crate::value::Value;

#[repr(C)]
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum ObjectType {
    ObjString,
    ObjFunction,
    ObjNativeFunction,
    ObjClosure,
    ObjUpvalue,
    ObjClass,
    ObjInstance,
    ObjBoundMethod,
}

/// Common header embedded at offset 0 of every concrete heap object.
#[repr(C)]
#[derive(Debug, Hash, Clone, Copy)]
pub struct Object {
    pub obj_type: ObjectType,
}

pub trait NativeObject {
    fn run(&self, args: &[Value]) -> Result<Value, String>;
}

impl Object {
    /// Cast helpers with debug assertions on the tag. Safety: the caller
    /// guarantees `self` is embedded at the start of the concrete object.
    #[inline]
    pub unsafe fn as_string(&self) -> &ObjectString {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjString));
        &*(self as *const _ as *const ObjectString)
    }

    #[inline]
    pub unsafe fn as_function(&self) -> &ObjectFunction {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjFunction));
        &*(self as *const _ as *const ObjectFunction)
    }

    #[inline]
    pub unsafe fn as_native_function(&self) -> &ObjectNativeFunction {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjNativeFunction));
        &*(self as *const _ as *const ObjectNativeFunction)
    }

    #[inline]
    pub unsafe fn as_closure(&self) -> &ObjectClosure {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjClosure));
        &*(self as *const _ as *const ObjectClosure)
    }

    #[inline]
    pub unsafe fn as_upvalue(&self) -> &ObjectUpvalue {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjUpvalue));
        &*(self as *const _ as *const ObjectUpvalue)
    }

    #[inline]
    pub unsafe fn as_class(&self) -> &ObjectClass {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjClass));
        &*(self as *const _ as *const ObjectClass)
    }

    #[inline]
    pub unsafe fn as_instance(&self) -> &ObjectInstance {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjInstance));
        &*(self as *const _ as *const ObjectInstance)
    }

    #[inline]
    pub unsafe fn as_bound_method(&self) -> &ObjectBoundMethod {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjBoundMethod));
        &*(self as *const _ as *const ObjectBoundMethod)
    }

    /// Compute the deep size of the concrete object this header belongs to.
    pub unsafe fn deep_size(&self) -> usize {
        match self.obj_type {
            ObjectType::ObjString => {
                (*(self as *const _ as *const ObjectString)).deep_size()
            }
            ObjectType::ObjFunction => {
                (*(self as *const _ as *const ObjectFunction)).deep_size()
            }
            ObjectType::ObjNativeFunction => {
                (*(self as *const _ as *const ObjectNativeFunction)).deep_size()
            }
            ObjectType::ObjClosure => {
                (*(self as *const _ as *const ObjectClosure)).deep_size()
            }
            ObjectType::ObjUpvalue => {
                (*(self as *const _ as *const ObjectUpvalue)).deep_size()
            }
            ObjectType::ObjClass => (*(self as *const _ as *const ObjectClass)).deep_size(),
            ObjectType::ObjInstance => {
                (*(self as *const _ as *const ObjectInstance)).deep_size()
            }
            ObjectType::ObjBoundMethod => {
                (*(self as *const _ as *const ObjectBoundMethod)).deep_size()
            }
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        self.obj_type == other.obj_type
    }
}

impl Eq for Object {}

/// Heap usage of GC managed structures: the struct itself plus owned
/// allocations, never following references to other GC objects.
pub trait GcSize {
    fn shallow_size(&self) -> usize;
    fn deep_size(&self) -> usize;
}

impl GcSize for ObjectString {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectString>()
    }
    fn deep_size(&self) -> usize {
        self.shallow_size() + self.content.capacity()
    }
}

impl GcSize for ObjectFunction {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectFunction>()
    }
    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.chunk.deep_size()
    }
}

impl GcSize for ObjectNativeFunction {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectNativeFunction>()
    }
    fn deep_size(&self) -> usize {
        // The boxed native itself is opaque; count the name only.
        self.shallow_size() + self.name.capacity()
    }
}

impl GcSize for ObjectClosure {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectClosure>()
    }
    fn deep_size(&self) -> usize {
        self.shallow_size() + self.upvalues.capacity() * size_of::<usize>()
    }
}

impl GcSize for ObjectUpvalue {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectUpvalue>()
    }
    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}

impl GcSize for ObjectClass {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectClass>()
    }
    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.methods.entries_size()
    }
}

impl GcSize for ObjectInstance {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectInstance>()
    }
    fn deep_size(&self) -> usize {
        self.shallow_size() + self.fields.entries_size()
    }
}

impl GcSize for ObjectBoundMethod {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectBoundMethod>()
    }
    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}
