//! LWM2M object/instance/resource addressing
//!
//! An address names a node of the device's resource tree. The hierarchy is
//! strict: a resource id needs an instance id, which needs an object type.
//! The constructors are the only way to build an address, so an address
//! with a resource but no instance cannot exist.

use crate::error::{Lwm2mError, Result};

/// Address of an object, object instance or resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lwm2mAddress {
    object_type: u16,
    object_id: Option<u16>,
    resource_id: Option<u16>,
}

impl Lwm2mAddress {
    /// Address a whole object type, e.g. `/3`
    pub fn object(object_type: u16) -> Self {
        Self {
            object_type,
            object_id: None,
            resource_id: None,
        }
    }

    /// Address one object instance, e.g. `/3/0`
    pub fn instance(object_type: u16, object_id: u16) -> Self {
        Self {
            object_type,
            object_id: Some(object_id),
            resource_id: None,
        }
    }

    /// Address a single resource, e.g. `/3/0/1`
    pub fn resource(object_type: u16, object_id: u16, resource_id: u16) -> Self {
        Self {
            object_type,
            object_id: Some(object_id),
            resource_id: Some(resource_id),
        }
    }

    /// Parse an absolute path of one to three integer segments
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let ids = segments
            .iter()
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|_| Lwm2mError::InvalidAddress(format!("{path}: '{s}' is not an id")))
            })
            .collect::<Result<Vec<u16>>>()?;

        match ids.as_slice() {
            [t] => Ok(Self::object(*t)),
            [t, i] => Ok(Self::instance(*t, *i)),
            [t, i, r] => Ok(Self::resource(*t, *i, *r)),
            _ => Err(Lwm2mError::InvalidAddress(format!(
                "{path}: expected 1 to 3 segments"
            ))),
        }
    }

    pub fn object_type(&self) -> u16 {
        self.object_type
    }

    pub fn object_id(&self) -> Option<u16> {
        self.object_id
    }

    pub fn resource_id(&self) -> Option<u16> {
        self.resource_id
    }

    /// Number of address components present (1 to 3)
    pub fn depth(&self) -> usize {
        1 + usize::from(self.object_id.is_some()) + usize::from(self.resource_id.is_some())
    }

    /// The instance this address belongs to, if any
    pub fn instance_address(&self) -> Option<Self> {
        self.object_id.map(|id| Self::instance(self.object_type, id))
    }

    /// Request path for this address
    pub fn path(&self) -> String {
        match (self.object_id, self.resource_id) {
            (Some(i), Some(r)) => format!("/{}/{}/{}", self.object_type, i, r),
            (Some(i), None) => format!("/{}/{}", self.object_type, i),
            _ => format!("/{}", self.object_type),
        }
    }
}

impl std::fmt::Display for Lwm2mAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(Lwm2mAddress::object(3).path(), "/3");
        assert_eq!(Lwm2mAddress::instance(3, 0).path(), "/3/0");
        assert_eq!(Lwm2mAddress::resource(3, 0, 1).path(), "/3/0/1");
        assert_eq!(Lwm2mAddress::resource(3, 0, 1).depth(), 3);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            Lwm2mAddress::parse("/3/0/1").unwrap(),
            Lwm2mAddress::resource(3, 0, 1)
        );
        assert_eq!(Lwm2mAddress::parse("/6").unwrap().depth(), 1);
        assert!(Lwm2mAddress::parse("/3/x").is_err());
        assert!(Lwm2mAddress::parse("/3/0/1/2").is_err());
        assert!(Lwm2mAddress::parse("/").is_err());
    }

    #[test]
    fn test_instance_address() {
        let address = Lwm2mAddress::resource(3, 2, 1);
        assert_eq!(address.instance_address(), Some(Lwm2mAddress::instance(3, 2)));
        assert_eq!(Lwm2mAddress::object(3).instance_address(), None);
    }
}
