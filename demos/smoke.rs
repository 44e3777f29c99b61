//! Smoke suite for the trialrun harness
//!
//! ```bash
//! cargo run --example smoke -- -j 4
//! cargo run --example smoke -- --list
//! cargo run --example smoke -- "demos/smoke.rs::test_lookup[alice]" -s
//! cargo run --example smoke -- --mark slow --format json-pretty
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use trialrun::prelude::*;

const PATH: &str = "demos/smoke.rs";

type Directory = Mutex<HashMap<String, u32>>;

fn directory() -> Fixture {
    Fixture::session("directory", || async {
        let entries: HashMap<String, u32> =
            [("alice".to_string(), 30), ("bob".to_string(), 25)].into_iter().collect();
        let directory = Arc::new(Mutex::new(entries));
        let handle = directory.clone();
        Ok(Resource::shared(directory).with_teardown(move || async move {
            handle.lock().clear();
            Ok(())
        }))
    })
}

fn scratch() -> Fixture {
    Fixture::blocking("scratch", Scope::Function, || {
        Ok(Resource::new(Mutex::new(Vec::<String>::new())))
    })
}

fn main() -> ExitCode {
    let directory = directory();
    let scratch = scratch();

    let lookup = {
        let directory = directory.clone();
        TestDefinition::asynchronous(PATH, "test_lookup", move |ctx, args| {
            let directory = directory.clone();
            async move {
                let name = args.get::<String>("name")?.clone();
                let entries = ctx.fixture::<Directory>(&directory).await?;
                writeln!(ctx.stdout(), "looking up {name}")?;
                let found = entries.lock().get(&name).copied();
                assert_true(found.is_some(), &format!("{name} is listed"))?;
                Ok(())
            }
        })
        .args(["name"])
        .param(ParamList::values(["alice".to_string(), "bob".to_string()]))
    };

    let grid = TestDefinition::asynchronous(PATH, "test_multiply", |_, args| async move {
        let a = *args.get::<i64>("a")?;
        let b = *args.get::<i64>("b")?;
        assert_equal(a * b, b * a)?;
        Ok(())
    })
    .args(["a", "b"])
    .param(ParamList::values([1_i64, 2, 3]))
    .param(ParamList::values([10_i64, -1]));

    let scratch_test = {
        let scratch = scratch.clone();
        TestDefinition::blocking(PATH, "test_scratch", move |ctx, _| {
            let buffer = ctx.blocking_fixture::<Mutex<Vec<String>>>(&scratch)?;
            buffer.lock().push("entry".to_string());
            assert_equal(buffer.lock().len(), 1)?;
            Ok(())
        })
    };

    let slow = TestDefinition::asynchronous(PATH, "test_slow_tick", |_, _| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    })
    .mark("slow");

    trialrun::cli::main(vec![lookup, grid, scratch_test, slow])
}
