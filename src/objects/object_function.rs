use crate::chunk::Chunk;
use crate::objects::object::{Object, ObjectType};

/// A compiled unit. An empty name marks the top-level script.
#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: u16,
    pub upvalue_count: u16,
    pub chunk: Box<Chunk>,
    pub name: String,
}

impl ObjectFunction {
    pub fn new(arity: u16, name: String) -> ObjectFunction {
        ObjectFunction {
            object: Object {
                obj_type: ObjectType::ObjFunction,
            },
            arity,
            upvalue_count: 0,
            chunk: Box::new(Chunk::new()),
            name,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}
