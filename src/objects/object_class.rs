use crate::objects::object::{Object, ObjectType};
use crate::table::Table;

/// A class and its instances share this file; methods live on the class,
/// fields on each instance.
#[repr(C)]
pub struct ObjectClass {
    pub object: Object,
    pub name: String,
    pub methods: Table,
}

impl ObjectClass {
    pub fn new(name: String) -> ObjectClass {
        ObjectClass {
            object: Object {
                obj_type: ObjectType::ObjClass,
            },
            name,
            methods: Table::new(),
        }
    }
}

#[repr(C)]
pub struct ObjectInstance {
    pub object: Object,
    pub class: *mut ObjectClass,
    pub fields: Table,
}

impl ObjectInstance {
    pub fn new(class: *mut ObjectClass) -> ObjectInstance {
        ObjectInstance {
            object: Object {
                obj_type: ObjectType::ObjInstance,
            },
            class,
            fields: Table::new(),
        }
    }
}
