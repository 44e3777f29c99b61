//! Test definition models
//!
//! A definition is what discovery hands over: a named body, its declared
//! arguments, and the parameter lists to expand over.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::unit::Args;
use crate::fixtures::TestContext;

/// Type-erased parameter or fixture value
pub type Value = Arc<dyn Any + Send + Sync>;

/// Async body: runs on the scheduler's task
pub type AsyncBody = Arc<dyn Fn(TestContext, Args) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Blocking body: runs on the blocking worker pool
pub type BlockingBody = Arc<dyn Fn(TestContext, Args) -> anyhow::Result<()> + Send + Sync>;

/// Execution lane of a test body
#[derive(Clone)]
pub enum TestBody {
    Async(AsyncBody),
    Blocking(BlockingBody),
}

impl TestBody {
    pub fn is_async(&self) -> bool {
        matches!(self, TestBody::Async(_))
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestBody::Async(_) => f.write_str("TestBody::Async"),
            TestBody::Blocking(_) => f.write_str("TestBody::Blocking"),
        }
    }
}

/// One named parameter value
#[derive(Clone)]
pub struct Param {
    name: String,
    value: Value,
}

impl Param {
    /// Create a parameter with an explicit display name
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(value),
        }
    }

    /// Create a parameter whose display name is the value's `Display` form
    pub fn value<T: Any + Send + Sync + fmt::Display>(value: T) -> Self {
        Self::new(value.to_string(), value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn raw(&self) -> &Value {
        &self.value
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Param({:?})", self.name)
    }
}

/// Ordered list of values for one declared argument
#[derive(Clone, Debug, Default)]
pub struct ParamList {
    params: Vec<Param>,
}

impl ParamList {
    pub fn new(params: Vec<Param>) -> Self {
        Self { params }
    }

    /// Build a list where every display name comes from `Display`
    pub fn values<T, I>(values: I) -> Self
    where
        T: Any + Send + Sync + fmt::Display,
        I: IntoIterator<Item = T>,
    {
        Self::new(values.into_iter().map(Param::value).collect())
    }

    pub fn push(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Param> {
        self.params.get(index)
    }
}

impl FromIterator<Param> for ParamList {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A discovered test: immutable once handed to the scheduler
#[derive(Clone, Debug)]
pub struct TestDefinition {
    path: String,
    name: String,
    body: TestBody,
    args: Vec<String>,
    params: Vec<ParamList>,
    markers: Vec<String>,
}

impl TestDefinition {
    /// Define a test whose body is a future
    pub fn asynchronous<F, Fut>(path: impl Into<String>, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: AsyncBody = Arc::new(move |ctx, args| body(ctx, args).boxed());
        Self::with_body(path, name, TestBody::Async(body))
    }

    /// Define a test whose body blocks; it runs on a dedicated worker
    pub fn blocking<F>(path: impl Into<String>, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestContext, Args) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_body(path, name, TestBody::Blocking(Arc::new(body)))
    }

    pub fn with_body(path: impl Into<String>, name: impl Into<String>, body: TestBody) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            body,
            args: Vec::new(),
            params: Vec::new(),
            markers: Vec::new(),
        }
    }

    /// Declare the body's argument names, in order
    pub fn args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = names.into_iter().map(Into::into).collect();
        self
    }

    /// Append a parameter list; lists bind to declared arguments by position
    pub fn param(mut self, list: ParamList) -> Self {
        self.params.push(list);
        self
    }

    pub fn mark(mut self, marker: impl Into<String>) -> Self {
        self.markers.push(marker.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &TestBody {
        &self.body
    }

    pub fn declared_args(&self) -> &[String] {
        &self.args
    }

    pub fn param_lists(&self) -> &[ParamList] {
        &self.params
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    /// `path::name`, the identifier prefix shared by every expanded unit
    pub fn base_id(&self) -> String {
        format!("{}::{}", self.path, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_display_names() {
        let p = Param::value(42u32);
        assert_eq!(p.name(), "42");
        assert_eq!(p.raw().downcast_ref::<u32>(), Some(&42));

        let named = Param::new("ascii", "hello".to_string());
        assert_eq!(named.name(), "ascii");
    }

    #[test]
    fn test_definition_builder() {
        let def = TestDefinition::blocking("tests/math.rs", "test_add", |_, _| Ok(()))
            .args(["a", "b"])
            .param(ParamList::values([1, 2]))
            .param(ParamList::values(["x", "y", "z"]))
            .mark("fast");

        assert_eq!(def.base_id(), "tests/math.rs::test_add");
        assert_eq!(def.declared_args(), ["a".to_string(), "b".to_string()]);
        assert_eq!(def.param_lists().len(), 2);
        assert_eq!(def.param_lists()[1].len(), 3);
        assert!(def.has_marker("fast"));
        assert!(!def.body().is_async());
    }

    #[test]
    fn test_async_definition() {
        let def = TestDefinition::asynchronous("t.rs", "test_io", |_, _| async { Ok(()) });
        assert!(def.body().is_async());
        assert!(def.declared_args().is_empty());
    }
}
