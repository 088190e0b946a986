#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    request: TestRequest,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, request: TestRequest) -> Self {
        Self { name, group, request }
    }

    pub fn shallow(name: &'static str, request: TestRequest) -> Self {
        Self::new(name, TestGroup::Shallow, request)
    }

    pub fn nested(name: &'static str, request: TestRequest) -> Self {
        Self::new(name, TestGroup::Nested, request)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn request(&self) -> &TestRequest {
        &self.request
    }

    pub fn uri(&self) -> &'static str {
        self.request.uri
    }
}

/// A request line to route, the body is always empty.
#[derive(Debug, Copy, Clone)]
pub struct TestRequest {
    method: &'static str,
    uri: &'static str,
}

impl TestRequest {
    pub const fn get(uri: &'static str) -> Self {
        Self::new("GET", uri)
    }

    pub const fn new(method: &'static str, uri: &'static str) -> Self {
        Self { method, uri }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn uri(&self) -> &'static str {
        self.uri
    }
}

/// How deep in the router tree the request is answered.
#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Shallow,
    Nested,
}
