// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Named object store
//!
//! The store is the owner of record for named geometry. Binding an existing
//! name replaces the previous object; deleting a missing name is a no-op.

use crate::error::{Error, Result};
use crate::geometry::{Association, DataArray, SurfaceMesh, VolumeMesh};
use crate::solid::Solid;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A typed geometric object
#[derive(Debug, Clone)]
pub enum Object {
    Solid(Solid),
    Surface(SurfaceMesh),
    Volume(VolumeMesh),
    Array(Association, DataArray),
}

/// Object kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Solid,
    SurfaceMesh,
    VolumeMesh,
    Array,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Solid => "solid",
            ObjectKind::SurfaceMesh => "surface mesh",
            ObjectKind::VolumeMesh => "volume mesh",
            ObjectKind::Array => "array",
        };
        write!(f, "{}", name)
    }
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Solid(_) => ObjectKind::Solid,
            Object::Surface(_) => ObjectKind::SurfaceMesh,
            Object::Volume(_) => ObjectKind::VolumeMesh,
            Object::Array(..) => ObjectKind::Array,
        }
    }
}

impl From<Solid> for Object {
    fn from(solid: Solid) -> Self {
        Object::Solid(solid)
    }
}

impl From<SurfaceMesh> for Object {
    fn from(mesh: SurfaceMesh) -> Self {
        Object::Surface(mesh)
    }
}

impl From<VolumeMesh> for Object {
    fn from(mesh: VolumeMesh) -> Self {
        Object::Volume(mesh)
    }
}

/// Mapping from unique names to objects, enumerated in name order
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: BTreeMap<String, Object>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, returning the object it replaced
    pub fn put(&mut self, name: impl Into<String>, object: impl Into<Object>) -> Option<Object> {
        let name = name.into();
        let object = object.into();
        debug!("store: bind '{}' ({})", name, object.kind());
        self.objects.insert(name, object)
    }

    pub fn put_array(&mut self, name: impl Into<String>, association: Association, array: DataArray) -> Option<Object> {
        self.put(name, Object::Array(association, array))
    }

    pub fn get(&self, name: &str) -> Result<&Object> {
        self.objects
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// Remove `name`; returns whether anything was bound
    pub fn delete(&mut self, name: &str) -> bool {
        let removed = self.objects.remove(name).is_some();
        if removed {
            debug!("store: delete '{}'", name);
        }
        removed
    }

    pub fn list_names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get_solid(&self, name: &str) -> Result<&Solid> {
        match self.get(name)? {
            Object::Solid(solid) => Ok(solid),
            _ => Err(type_mismatch(name, ObjectKind::Solid)),
        }
    }

    pub fn get_surface(&self, name: &str) -> Result<&SurfaceMesh> {
        match self.get(name)? {
            Object::Surface(mesh) => Ok(mesh),
            _ => Err(type_mismatch(name, ObjectKind::SurfaceMesh)),
        }
    }

    pub fn get_volume(&self, name: &str) -> Result<&VolumeMesh> {
        match self.get(name)? {
            Object::Volume(mesh) => Ok(mesh),
            _ => Err(type_mismatch(name, ObjectKind::VolumeMesh)),
        }
    }

    pub fn get_array(&self, name: &str) -> Result<(Association, &DataArray)> {
        match self.get(name)? {
            Object::Array(association, array) => Ok((*association, array)),
            _ => Err(type_mismatch(name, ObjectKind::Array)),
        }
    }
}

fn type_mismatch(name: &str, expected: ObjectKind) -> Error {
    Error::TypeMismatch {
        name: name.to_string(),
        expected: expected.to_string(),
    }
}
