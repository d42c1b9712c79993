use crate::objects::object::{Object, ObjectType};
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_upvalue::ObjectUpvalue;

/// Runtime instantiation of a function together with its captured upvalues.
/// The upvalue slots are filled by the CLOSURE handler right after
/// allocation; until then the vector is empty.
#[repr(C)]
pub struct ObjectClosure {
    pub object: Object,
    pub function: *mut ObjectFunction,
    pub upvalues: Vec<*mut ObjectUpvalue>,
}

impl ObjectClosure {
    pub fn new(function: *mut ObjectFunction) -> ObjectClosure {
        let upvalue_count = unsafe { (*function).upvalue_count } as usize;
        ObjectClosure {
            object: Object {
                obj_type: ObjectType::ObjClosure,
            },
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }
    }
}
