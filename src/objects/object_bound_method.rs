use crate::objects::object::{Object, ObjectType};
use crate::objects::object_closure::ObjectClosure;
use crate::value::Value;

/// A method closure paired with the receiver it was pulled off of.
#[repr(C)]
pub struct ObjectBoundMethod {
    pub object: Object,
    pub receiver: Value,
    pub method: *mut ObjectClosure,
}

impl ObjectBoundMethod {
    pub fn new(receiver: Value, method: *mut ObjectClosure) -> ObjectBoundMethod {
        ObjectBoundMethod {
            object: Object {
                obj_type: ObjectType::ObjBoundMethod,
            },
            receiver,
            method,
        }
    }
}
