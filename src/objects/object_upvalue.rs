use crate::objects::object::{Object, ObjectType};
use crate::value::{make_nil_value, Value};

/// Open while `location` points into the VM value stack; closing copies the
/// captured value into `closed` and repoints `location` at it.
#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub location: *mut Value,
    pub closed: Value,
}

impl ObjectUpvalue {
    pub fn new(location: *mut Value) -> ObjectUpvalue {
        ObjectUpvalue {
            object: Object {
                obj_type: ObjectType::ObjUpvalue,
            },
            location,
            closed: make_nil_value(),
        }
    }

    pub fn close(&mut self) {
        unsafe {
            self.closed = *self.location;
        }
        self.location = &mut self.closed as *mut Value;
    }

    pub fn is_open(&self) -> bool {
        !std::ptr::eq(self.location, &self.closed as *const Value)
    }
}
