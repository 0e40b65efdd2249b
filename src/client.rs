//! Device-side library handlers
//!
//! The routes and handler pairs a device serves so the management server
//! can read, write, execute, discover, create and delete on its objects.

use crate::address::Lwm2mAddress;
use crate::attributes::AttributeSet;
use crate::coap_types::{ContentFormat, Method, Request, Response};
use crate::error::{Lwm2mError, Result};
use crate::links::format_links;
use crate::objects::ObjectRegistry;
use crate::router::{HandlerTable, Operation, PathPattern, Route, RouteCondition, UserHandler};
use std::sync::Arc;

/// Default device route table. Order matters: discover and write-attributes
/// share method and paths with read and write and must be tried first.
pub fn routes() -> Vec<Route> {
    vec![
        Route::new(Method::Get, PathPattern::Numeric(1..=3), Operation::Discover)
            .when(RouteCondition::AcceptLinkFormat),
        Route::new(Method::Get, PathPattern::Numeric(3..=3), Operation::Read),
        Route::new(
            Method::Put,
            PathPattern::Numeric(1..=3),
            Operation::WriteAttributes,
        )
        .when(RouteCondition::HasQuery),
        Route::new(Method::Put, PathPattern::Numeric(3..=3), Operation::Write),
        Route::new(Method::Post, PathPattern::Numeric(3..=3), Operation::Execute),
        Route::new(Method::Post, PathPattern::Numeric(2..=2), Operation::Create),
        Route::new(Method::Delete, PathPattern::Numeric(2..=2), Operation::Delete),
    ]
}

/// Library handlers backed by `objects`, with no-op user handlers
pub fn handlers(objects: Arc<dyn ObjectRegistry>) -> HandlerTable {
    let mut table = HandlerTable::new();
    install(&mut table, Operation::Read, &objects, handle_read);
    install(&mut table, Operation::Write, &objects, handle_write);
    install(&mut table, Operation::Execute, &objects, handle_execute);
    install(
        &mut table,
        Operation::WriteAttributes,
        &objects,
        handle_write_attributes,
    );
    install(&mut table, Operation::Discover, &objects, handle_discover);
    install(&mut table, Operation::Create, &objects, handle_create);
    install(&mut table, Operation::Delete, &objects, handle_delete);
    table
}

type Handler = fn(&dyn ObjectRegistry, &Request, &UserHandler) -> Result<Response>;

fn install(
    table: &mut HandlerTable,
    operation: Operation,
    objects: &Arc<dyn ObjectRegistry>,
    handler: Handler,
) {
    let objects = objects.clone();
    table.insert(operation, move |request, user| {
        handler(objects.as_ref(), request, user).unwrap_or_else(|e| {
            log::debug!("{} {} failed: {}", operation, request.path, e);
            Response::error(e.response_code(), &e.to_string())
        })
    });
}

/// Split a routed path into (type, instance, resource)
fn parts(request: &Request) -> Result<(Lwm2mAddress, u16, Option<u16>, Option<u16>)> {
    let address = Lwm2mAddress::parse(&request.path)?;
    Ok((
        address,
        address.object_type(),
        address.object_id(),
        address.resource_id(),
    ))
}

fn instance(request: &Request) -> Result<(Lwm2mAddress, u16, u16)> {
    match parts(request)? {
        (address, t, Some(i), _) => Ok((address, t, i)),
        _ => Err(Lwm2mError::InvalidAddress(request.path.clone())),
    }
}

fn resource(request: &Request) -> Result<(Lwm2mAddress, u16, u16, u16)> {
    match parts(request)? {
        (address, t, Some(i), Some(r)) => Ok((address, t, i, r)),
        _ => Err(Lwm2mError::InvalidAddress(request.path.clone())),
    }
}

fn handle_read(
    objects: &dyn ObjectRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let (address, t, i, r) = resource(request)?;
    let value = objects.get_resource(t, i, r)?;
    user.on_value(&address, &value)?;
    Ok(Response::content(value, ContentFormat::TextPlain))
}

fn handle_write(
    objects: &dyn ObjectRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let (address, t, i, r) = resource(request)?;
    let value = request.payload_text();
    objects.set_resource(t, i, r, &value)?;
    user.on_value(&address, &value)?;
    Ok(Response::changed())
}

fn handle_execute(
    objects: &dyn ObjectRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let (address, t, i, _) = resource(request)?;
    objects.get(t, i)?;
    let arguments = request.payload_text();
    let arguments = (!arguments.is_empty()).then_some(arguments.as_str());
    user.on_execute(&address, arguments)?;
    Ok(Response::changed())
}

fn handle_write_attributes(
    objects: &dyn ObjectRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let (address, t, i, _) = parts(request)?;
    let attributes = AttributeSet::from_query(request.query.as_deref().unwrap_or_default())?;
    if let Some(i) = i {
        objects.get(t, i)?;
    }
    user.on_attributes(&address, &attributes)?;
    Ok(Response::changed())
}

fn handle_discover(
    objects: &dyn ObjectRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let (address, t, i, r) = parts(request)?;

    let mut uris = Vec::new();
    if i.is_none() {
        uris.push(address.path());
    }
    for object in objects
        .list()?
        .iter()
        .filter(|o| o.object_type == t && i.is_none_or(|i| o.object_id == i))
    {
        if r.is_none() {
            uris.push(object.object_uri());
        }
        for resource_id in object.resources.keys() {
            if r.is_none_or(|r| r == *resource_id) {
                uris.push(Lwm2mAddress::resource(t, object.object_id, *resource_id).path());
            }
        }
    }

    // Only the bare object link means nothing matched
    if uris.is_empty() || (i.is_none() && uris.len() == 1) {
        return Err(Lwm2mError::ObjectNotFound(address.path()));
    }

    user.on_address(&address)?;
    Ok(Response::content(
        format_links(&uris),
        ContentFormat::LinkFormat,
    ))
}

fn handle_create(
    objects: &dyn ObjectRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let (address, t, i) = instance(request)?;
    objects.create(t, i)?;
    user.on_address(&address)?;
    Ok(Response::created(&address.path()))
}

fn handle_delete(
    objects: &dyn ObjectRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let (address, t, i) = instance(request)?;
    objects.remove(t, i)?;
    user.on_address(&address)?;
    Ok(Response::deleted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap_types::ResponseCode;
    use crate::objects::MemoryObjectRegistry;
    use crate::router::HandlerPair;
    use std::sync::Mutex;

    fn device() -> (Arc<MemoryObjectRegistry>, HandlerTable) {
        let objects = Arc::new(MemoryObjectRegistry::new());
        objects.create(3, 0).unwrap();
        objects.set_resource(3, 0, 0, "Open Mobile Alliance").unwrap();
        objects.set_resource(3, 0, 1, "Lightweight M2M Client").unwrap();
        let table = handlers(objects.clone());
        (objects, table)
    }

    /// Route like the router does, without a listener
    fn dispatch(table: &HandlerTable, request: &Request) -> Response {
        let route = routes()
            .into_iter()
            .find(|r| r.matches(request))
            .expect("no route");
        let pair: &HandlerPair = table.get(route.operation).unwrap();
        pair.invoke(request)
    }

    #[test]
    fn test_read_existing_and_missing() {
        let (_, table) = device();

        let response = dispatch(&table, &Request::new(Method::Get, "/3/0/1"));
        assert_eq!(response.code, ResponseCode::Content);
        assert_eq!(response.payload_text(), "Lightweight M2M Client");

        let response = dispatch(&table, &Request::new(Method::Get, "/3/0/9"));
        assert_eq!(response.code, ResponseCode::NotFound);
    }

    #[test]
    fn test_write_stores_and_notifies_user() {
        let (objects, mut table) = device();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        table
            .set_user(UserHandler::Write(Arc::new(move |address, value| {
                *sink.lock().unwrap() = Some((address.path(), value.to_string()));
                Ok(())
            })))
            .unwrap();

        let request =
            Request::new(Method::Put, "/3/0/1").with_payload("renamed", ContentFormat::TextPlain);
        assert_eq!(dispatch(&table, &request).code, ResponseCode::Changed);
        assert_eq!(objects.get_resource(3, 0, 1).unwrap(), "renamed");
        assert_eq!(
            *seen.lock().unwrap(),
            Some(("/3/0/1".to_string(), "renamed".to_string()))
        );

        let missing =
            Request::new(Method::Put, "/5/0/1").with_payload("x", ContentFormat::TextPlain);
        assert_eq!(dispatch(&table, &missing).code, ResponseCode::NotFound);
    }

    #[test]
    fn test_discover_lists_links() {
        let (_, table) = device();

        let request = Request::new(Method::Get, "/3").with_accept(ContentFormat::LinkFormat);
        let response = dispatch(&table, &request);
        assert_eq!(response.code, ResponseCode::Content);
        assert_eq!(response.content_format, Some(ContentFormat::LinkFormat));
        assert_eq!(response.payload_text(), "</3>,</3/0>,</3/0/0>,</3/0/1>");

        let request = Request::new(Method::Get, "/3/0/1").with_accept(ContentFormat::LinkFormat);
        assert_eq!(dispatch(&table, &request).payload_text(), "</3/0/1>");

        let request = Request::new(Method::Get, "/4").with_accept(ContentFormat::LinkFormat);
        assert_eq!(dispatch(&table, &request).code, ResponseCode::NotFound);
    }

    #[test]
    fn test_write_attributes_validates_names() {
        let (_, table) = device();

        let ok = Request::new(Method::Put, "/3/0/1").with_query("pmin=1&pmax=10&");
        assert_eq!(dispatch(&table, &ok).code, ResponseCode::Changed);

        let bad = Request::new(Method::Put, "/3/0").with_query("pmin=1&color=red");
        let response = dispatch(&table, &bad);
        assert_eq!(response.code, ResponseCode::BadRequest);
        assert!(response.payload_text().contains("color"));
    }

    #[test]
    fn test_execute_passes_arguments() {
        let (_, mut table) = device();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        table
            .set_user(UserHandler::Execute(Arc::new(move |address, args| {
                sink.lock()
                    .unwrap()
                    .push(format!("{address} {}", args.unwrap_or("-")));
                Ok(())
            })))
            .unwrap();

        let reboot = Request::new(Method::Post, "/3/0/4");
        assert_eq!(dispatch(&table, &reboot).code, ResponseCode::Changed);
        let with_args =
            Request::new(Method::Post, "/3/0/4").with_payload("0='now'", ContentFormat::TextPlain);
        dispatch(&table, &with_args);

        assert_eq!(*seen.lock().unwrap(), vec!["/3/0/4 -", "/3/0/4 0='now'"]);
    }

    #[test]
    fn test_create_and_delete_instances() {
        let (objects, table) = device();

        let response = dispatch(&table, &Request::new(Method::Post, "/3/1"));
        assert_eq!(response.code, ResponseCode::Created);
        assert_eq!(response.location(), "/3/1");
        assert!(objects.get(3, 1).is_ok());

        let again = dispatch(&table, &Request::new(Method::Post, "/3/1"));
        assert_eq!(again.code, ResponseCode::BadRequest);

        let deleted = dispatch(&table, &Request::new(Method::Delete, "/3/1"));
        assert_eq!(deleted.code, ResponseCode::Deleted);
        assert!(objects.get(3, 1).is_err());

        let missing = dispatch(&table, &Request::new(Method::Delete, "/3/1"));
        assert_eq!(missing.code, ResponseCode::NotFound);
    }
}
