use std::sync::Arc;

use crate::error::Error;
use crate::test::mock::MockBackend;
use crate::*;

fn mock_init(name: &'static str) -> impl Fn(&str, Option<&UserData>) -> Result<Box<dyn Backend>> + Send + Sync {
    move |_params: &str, _user_data: Option<&UserData>| Ok(Box::new(MockBackend::new(name)) as Box<dyn Backend>)
}

#[test]
fn test_register_and_init() {
    let mut registry = BackendRegistry::new();
    let index = registry.register("MOCK", mock_init("mock"), cpu_buffer_type(), None);

    assert_eq!(index, 0);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.find("MOCK"), Some(0));
    assert_eq!(registry.name(0).unwrap(), "MOCK");

    let backend = registry.init_backend("MOCK", "").unwrap();
    assert_eq!(backend.name(), "mock");
}

#[test]
fn test_last_registration_wins() {
    let mut registry = BackendRegistry::new();
    registry.register("OTHER", mock_init("other"), cpu_buffer_type(), None);
    let first = registry.register("MOCK", mock_init("first"), cpu_buffer_type(), None);
    let second = registry.register("MOCK", mock_init("second"), cpu_buffer_type(), None);

    assert_eq!(first, second);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.init_backend("MOCK", "").unwrap().name(), "second");
}

#[test]
fn test_unknown_backend() {
    let registry = BackendRegistry::new();

    let err = registry.init_backend("NOPE", "").unwrap_err();
    assert!(matches!(err, Error::UnknownBackend { ref name } if name == "NOPE"));
    assert!(matches!(registry.name(3), Err(Error::BackendIndex { index: 3, len: 0 })));
}

#[test]
fn test_init_failure_is_reported() {
    let mut registry = BackendRegistry::new();
    registry.register(
        "GPU",
        |_params: &str, _user_data: Option<&UserData>| -> Result<Box<dyn Backend>> {
            error::UnavailableSnafu { backend: "GPU", reason: "no device" }.fail()
        },
        cpu_buffer_type(),
        None,
    );

    let err = registry.init_backend("GPU", "").unwrap_err();
    let Error::BackendInit { name, source } = err else { panic!("expected a backend init error") };
    assert_eq!(name, "GPU");
    assert!(matches!(*source, Error::Unavailable { .. }));
}

#[test]
fn test_params_and_user_data_reach_init() {
    let mut registry = BackendRegistry::new();
    let user_data: UserData = Arc::new(7usize);
    registry.register(
        "MOCK",
        |params: &str, user_data: Option<&UserData>| -> Result<Box<dyn Backend>> {
            let scale = user_data.and_then(|data| data.downcast_ref::<usize>()).copied().unwrap_or(0);
            Ok(Box::new(MockBackend::new(&format!("{params}x{scale}"))))
        },
        cpu_buffer_type(),
        Some(user_data),
    );

    assert_eq!(registry.init_backend_from_str("MOCK:fast").unwrap().name(), "fastx7");
    assert_eq!(registry.init_backend_from_str("MOCK").unwrap().name(), "x7");
}

#[test]
fn test_alloc_from_default_buffer_type() {
    let mut registry = BackendRegistry::new();
    registry.register("MOCK", mock_init("mock"), cpu_buffer_type(), None);

    let buffer = registry.alloc_buffer(0, 512).unwrap();

    assert_eq!(buffer.size(), 512);
    assert!(buffer.is_host());
    assert!(is_cpu_buffer_type(&*registry.default_buffer_type(0).unwrap()));
    assert_eq!(registry.names().collect::<Vec<_>>(), ["MOCK"]);
}
