//! Object arena
//!
//! Every guest object lives in a [`Heap`] keyed by a stable [`ObjectId`].
//! Nothing outside the heap holds a pointer to an object, only its id, so the
//! whole object graph can be enumerated, serialized and rebuilt as plain data.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::ast::FunctionNode;
use crate::conversions::{array_index, primitive_to_number, to_uint32};
use crate::scheduler::ThreadId;
use crate::scope::ScopeId;
use crate::value::{CheapClone, JsString, Value};

/// Insertion-ordered map with the fast Fx hasher
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Stable identity of a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// Class tag, as reported by `Object.prototype.toString`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Class {
    Object,
    Function,
    Array,
    Arguments,
    Error,
    Boolean,
    Number,
    String,
    Thread,
    Owner,
}

impl Class {
    pub fn name(self) -> &'static str {
        match self {
            Class::Object => "Object",
            Class::Function => "Function",
            Class::Array => "Array",
            Class::Arguments => "Arguments",
            Class::Error => "Error",
            Class::Boolean => "Boolean",
            Class::Number => "Number",
            Class::String => "String",
            Class::Thread => "Thread",
            Class::Owner => "Owner",
        }
    }
}

/// A data property with its attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub value: Value,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Property {
    /// Writable, enumerable, configurable: what plain assignment creates.
    pub fn data(value: Value) -> Self {
        Self {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable and configurable but hidden from `for-in`.
    pub fn hidden(value: Value) -> Self {
        Self {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn read_only(value: Value) -> Self {
        Self {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }
}

/// How a function object is implemented.
///
/// Native functions are named by a stable string id, never a host pointer,
/// so a checkpoint can rebind them after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FunctionData {
    Guest {
        node: Rc<FunctionNode>,
        scope: ScopeId,
    },
    Native {
        id: JsString,
    },
}

/// Class-specific internal slots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "slot", content = "value")]
pub enum ObjectData {
    #[default]
    Ordinary,
    Function(FunctionData),
    Boolean(bool),
    Number(#[serde(with = "crate::value::number_repr")] f64),
    String(JsString),
    Thread(ThreadId),
}

/// A guest object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapObject {
    pub id: ObjectId,
    pub class: Class,
    pub proto: Option<ObjectId>,
    pub properties: FxIndexMap<JsString, Property>,
    pub extensible: bool,
    pub data: ObjectData,
}

impl HeapObject {
    pub fn is_callable(&self) -> bool {
        matches!(self.data, ObjectData::Function(_))
    }

    pub fn function(&self) -> Option<&FunctionData> {
        match &self.data {
            ObjectData::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Own property, including the virtual `length` and index properties of
    /// a boxed string.
    pub fn own_property(&self, key: &str) -> Option<Property> {
        if let ObjectData::String(s) = &self.data {
            if key == "length" {
                return Some(Property::read_only(Value::from(s.utf16_len() as f64)));
            }
            if let Some(index) = array_index(key) {
                if let Some(unit) = s.code_unit_at(index as usize) {
                    let mut prop = Property::read_only(Value::String(unit));
                    prop.enumerable = true;
                    return Some(prop);
                }
            }
        }
        self.properties.get(key).cloned()
    }

    /// Own keys in enumeration order. Boxed string indices come first.
    pub fn own_keys(&self, only_enumerable: bool) -> Vec<JsString> {
        let mut keys = Vec::new();
        if let ObjectData::String(s) = &self.data {
            for i in 0..s.utf16_len() {
                keys.push(JsString::from(i.to_string()));
            }
        }
        for (key, prop) in &self.properties {
            if !only_enumerable || prop.enumerable {
                keys.push(key.cheap_clone());
            }
        }
        keys
    }
}

/// Outcome of a property write. Anything other than `Done` is a guest
/// `TypeError` (or `RangeError` for a bad array length) in the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Done,
    ReadOnly,
    NotExtensible,
    InvalidLength,
    NoSuchObject,
}

/// Arena of guest objects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heap {
    objects: BTreeMap<ObjectId, HeapObject>,
    next_id: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, class: Class, proto: Option<ObjectId>, data: ObjectData) -> ObjectId {
        self.next_id += 1;
        let id = ObjectId(self.next_id);
        self.objects.insert(
            id,
            HeapObject {
                id,
                class,
                proto,
                properties: FxIndexMap::default(),
                extensible: true,
                data,
            },
        );
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All objects in id order
    pub fn iter(&self) -> impl Iterator<Item = &HeapObject> {
        self.objects.values()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Rebuild an arena from enumerated objects.
    pub(crate) fn from_parts(objects: Vec<HeapObject>, next_id: u64) -> Self {
        let objects = objects.into_iter().map(|o| (o.id, o)).collect();
        Self { objects, next_id }
    }

    /// Drop every object not in `live`. Returns how many were freed.
    pub(crate) fn retain(&mut self, live: &std::collections::BTreeSet<ObjectId>) -> usize {
        let before = self.objects.len();
        self.objects.retain(|id, _| live.contains(id));
        before - self.objects.len()
    }

    pub fn class_of(&self, id: ObjectId) -> Option<Class> {
        self.get(id).map(|o| o.class)
    }

    pub fn is_callable(&self, id: ObjectId) -> bool {
        self.get(id).is_some_and(HeapObject::is_callable)
    }

    /// Define (or overwrite) an own property without attribute checks.
    pub fn define(&mut self, id: ObjectId, key: impl Into<JsString>, prop: Property) {
        if let Some(obj) = self.get_mut(id) {
            obj.properties.insert(key.into(), prop);
        }
    }

    /// Shorthand for defining a non-enumerable method or constant.
    pub fn define_hidden(&mut self, id: ObjectId, key: impl Into<JsString>, value: Value) {
        self.define(id, key, Property::hidden(value));
    }

    /// Walk the prototype chain for `key`.
    ///
    /// The walk stops after `max_depth` links, so a cyclic chain built by
    /// guest or host code reads as "not found" instead of hanging.
    pub fn lookup(&self, id: ObjectId, key: &str, max_depth: usize) -> Option<Property> {
        let mut current = Some(id);
        let mut depth = 0;
        while let Some(obj_id) = current {
            if depth > max_depth {
                tracing::warn!(object = %id, key, "prototype chain exceeds depth guard");
                return None;
            }
            let obj = self.get(obj_id)?;
            if let Some(prop) = obj.own_property(key) {
                return Some(prop);
            }
            current = obj.proto;
            depth += 1;
        }
        None
    }

    /// `[[Get]]`: the property value, or undefined.
    pub fn get_value(&self, id: ObjectId, key: &str, max_depth: usize) -> Value {
        self.lookup(id, key, max_depth)
            .map(|p| p.value)
            .unwrap_or(Value::Undefined)
    }

    pub fn has_property(&self, id: ObjectId, key: &str, max_depth: usize) -> bool {
        self.lookup(id, key, max_depth).is_some()
    }

    pub fn has_own_property(&self, id: ObjectId, key: &str) -> bool {
        self.get(id).is_some_and(|o| o.own_property(key).is_some())
    }

    /// `[[Put]]` with strict-mode failure reporting.
    pub fn set(&mut self, id: ObjectId, key: &str, value: Value, max_depth: usize) -> SetOutcome {
        let Some(obj) = self.get(id) else {
            return SetOutcome::NoSuchObject;
        };

        match obj.own_property(key) {
            Some(prop) if !prop.writable => return SetOutcome::ReadOnly,
            Some(_) => {}
            None => {
                // An inherited read-only property shadows assignment.
                if let Some(proto) = obj.proto {
                    if let Some(inherited) = self.lookup(proto, key, max_depth) {
                        if !inherited.writable {
                            return SetOutcome::ReadOnly;
                        }
                    }
                }
                if !obj.extensible {
                    return SetOutcome::NotExtensible;
                }
            }
        }

        if obj.class == Class::Array {
            if key == "length" {
                return self.set_array_length(id, &value);
            }
            if let Some(index) = array_index(key) {
                let length = self.array_length(id);
                if index >= length {
                    if let Some(obj) = self.get_mut(id) {
                        if let Some(len_prop) = obj.properties.get_mut("length") {
                            len_prop.value = Value::from(index as f64 + 1.0);
                        }
                    }
                }
            }
        }

        let Some(obj) = self.get_mut(id) else {
            return SetOutcome::NoSuchObject;
        };
        match obj.properties.get_mut(key) {
            Some(prop) => prop.value = value,
            None => {
                obj.properties
                    .insert(JsString::from(key), Property::data(value));
            }
        }
        SetOutcome::Done
    }

    /// `[[Delete]]`: false when the property is non-configurable.
    pub fn delete(&mut self, id: ObjectId, key: &str) -> bool {
        let Some(obj) = self.get_mut(id) else {
            return true;
        };
        if let ObjectData::String(s) = &obj.data {
            if key == "length" {
                return false;
            }
            if array_index(key).is_some_and(|i| (i as usize) < s.utf16_len()) {
                return false;
            }
        }
        match obj.properties.get(key) {
            Some(prop) if !prop.configurable => false,
            Some(_) => {
                obj.properties.shift_remove(key);
                true
            }
            None => true,
        }
    }

    /// Current `length` of an array, 0 for anything else.
    pub fn array_length(&self, id: ObjectId) -> u32 {
        self.get(id)
            .and_then(|o| o.properties.get("length"))
            .and_then(|p| p.value.as_number())
            .map(to_uint32)
            .unwrap_or(0)
    }

    fn set_array_length(&mut self, id: ObjectId, value: &Value) -> SetOutcome {
        let number = primitive_to_number(value);
        let new_len = to_uint32(number);
        if new_len as f64 != number {
            return SetOutcome::InvalidLength;
        }
        let Some(obj) = self.get_mut(id) else {
            return SetOutcome::NoSuchObject;
        };
        obj.properties
            .retain(|k, _| array_index(k).is_none_or(|i| i < new_len));
        match obj.properties.get_mut("length") {
            Some(prop) => prop.value = Value::from(new_len as f64),
            None => {
                let mut prop = Property::hidden(Value::from(new_len as f64));
                prop.configurable = false;
                obj.properties.insert(JsString::from("length"), prop);
            }
        }
        SetOutcome::Done
    }

    /// Allocate an array holding `items`.
    pub fn alloc_array(&mut self, proto: Option<ObjectId>, items: Vec<Value>) -> ObjectId {
        let id = self.alloc(Class::Array, proto, ObjectData::Ordinary);
        if let Some(obj) = self.get_mut(id) {
            let mut length = Property::hidden(Value::from(items.len() as f64));
            length.configurable = false;
            obj.properties.insert(JsString::from("length"), length);
            for (i, item) in items.into_iter().enumerate() {
                obj.properties
                    .insert(JsString::from(i.to_string()), Property::data(item));
            }
        }
        id
    }

    /// Enumerable keys along the prototype chain, own keys first, each name
    /// reported once (the `for-in` key list).
    pub fn enumerable_keys(&self, id: ObjectId, max_depth: usize) -> Vec<JsString> {
        let mut seen = rustc_hash::FxHashSet::default();
        let mut visited = rustc_hash::FxHashSet::default();
        let mut keys = Vec::new();
        let mut current = Some(id);
        while let Some(obj_id) = current {
            if !visited.insert(obj_id) || visited.len() > max_depth {
                break;
            }
            let Some(obj) = self.get(obj_id) else {
                break;
            };
            for key in obj.own_keys(false) {
                let enumerable = obj.own_property(&key).is_some_and(|p| p.enumerable);
                if seen.insert(key.cheap_clone()) && enumerable {
                    keys.push(key);
                }
            }
            current = obj.proto;
        }
        keys
    }

    /// Set the prototype, refusing to close a cycle.
    pub fn set_prototype(&mut self, id: ObjectId, proto: Option<ObjectId>) -> bool {
        let mut current = proto;
        let mut visited = rustc_hash::FxHashSet::default();
        while let Some(p) = current {
            if p == id || !visited.insert(p) {
                return false;
            }
            current = self.get(p).and_then(|o| o.proto);
        }
        match self.get_mut(id) {
            Some(obj) => {
                obj.proto = proto;
                true
            }
            None => false,
        }
    }

    /// `instanceof` walk: is `proto` on the chain of `id`?
    pub fn inherits_from(&self, id: ObjectId, proto: ObjectId, max_depth: usize) -> bool {
        let mut current = self.get(id).and_then(|o| o.proto);
        let mut depth = 0;
        while let Some(p) = current {
            if p == proto {
                return true;
            }
            depth += 1;
            if depth > max_depth {
                return false;
            }
            current = self.get(p).and_then(|o| o.proto);
        }
        false
    }
}
