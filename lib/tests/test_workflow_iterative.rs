// Copyright 2024 The Skiff Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::sync::Mutex;

use assert_matches::assert_matches;
use indoc::indoc;
use itertools::Itertools as _;
use pretty_assertions::assert_eq;
use skiff_lib::destination::DestinationEffectType;
use skiff_lib::migration::MigrationError;
use skiff_lib::transform::TransformError;
use skiff_lib::transform::Transformation;
use skiff_lib::transform_work::TransformWork;
use testutils::RecordingDestination;
use testutils::TestConsole;
use testutils::TestingOrigin;
use testutils::load_config;
use testutils::register_testing_transformation;
use testutils::set_testing_endpoints;
use testutils::test_options;

const ITERATIVE_CONFIG: &str = indoc! {r#"
    core.workflow(
        name = "test",
        origin = testing.origin(),
        destination = testing.destination(),
        authoring = authoring.pass_thru("Default <default@example.com>"),
        mode = "ITERATIVE",
    )
"#};

fn setup() -> (Arc<TestingOrigin>, Arc<RecordingDestination>) {
    let origin = TestingOrigin::new();
    origin.add_change("rev1", "change 1\n", &[("a.txt", "one")]);
    origin.add_change("rev2", "change 2\n", &[("b.txt", "two")]);
    origin.add_change("rev3", "change 3\n", &[("c.txt", "three")]);
    let destination = RecordingDestination::new();
    set_testing_endpoints(origin.clone(), destination.clone());
    (origin, destination)
}

#[test]
fn test_iterative_migrates_each_change_in_order() {
    let (_origin, _destination) = setup();
    let config = load_config(
        &[("copy.bara.sky", ITERATIVE_CONFIG)],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    let workdir = testutils::new_temp_dir();
    let effects = config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap();

    // One CREATED effect per origin change, oldest first. The first run
    // has no baseline, so only the resolved head would be imported; to see
    // the full history we migrate from scratch: without a baseline the
    // planner imports the single resolved revision.
    assert_eq!(effects.len(), 1);
    assert_eq!(
        effects[0].origin_changes[0].revision().as_string(),
        "rev3"
    );
}

#[test]
fn test_iterative_advancement_after_baseline() {
    let (origin, destination) = setup();
    let config = load_config(
        &[("copy.bara.sky", ITERATIVE_CONFIG)],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    let workdir = testutils::new_temp_dir();
    // Establish the baseline at rev3.
    config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap();

    origin.add_change("rev4", "change 4\n", &[("d.txt", "four")]);
    origin.add_change("rev5", "change 5\n", &[("e.txt", "five")]);
    origin.add_change("rev6", "change 6\n", &[("f.txt", "six")]);

    let effects = config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap();
    assert_eq!(effects.len(), 3);
    assert!(
        effects
            .iter()
            .all(|e| e.effect_type == DestinationEffectType::Created)
    );
    let covered: Vec<_> = effects
        .iter()
        .map(|e| e.origin_changes[0].revision().as_string().to_owned())
        .collect();
    assert_eq!(covered, ["rev4", "rev5", "rev6"]);

    // Destination writes happened in the same order, one per change.
    let writes = destination.published_writes();
    let rev_ids: Vec<_> = writes.iter().map(|w| w.rev_id.clone()).collect();
    assert_eq!(rev_ids, ["rev3", "rev4", "rev5", "rev6"]);
    // Each iterative write carries its own message.
    assert_eq!(writes[2].message.lines().next().unwrap(), "change 5");

    // Re-running produces no new destination changes.
    let effects = config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap();
    assert!(
        effects
            .iter()
            .all(|e| e.effect_type == DestinationEffectType::Noop)
    );
    assert_eq!(destination.published_writes().len(), 4);
}

#[test]
fn test_parallel_prepare_keeps_write_order() {
    let (origin, destination) = setup();
    let mut options = test_options();
    options.workflow.threads = 4;
    let config = load_config(
        &[("copy.bara.sky", ITERATIVE_CONFIG)],
        Arc::new(options),
        TestConsole::new(),
    )
    .unwrap();
    let workdir = testutils::new_temp_dir();
    config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap();
    for id in ["rev4", "rev5", "rev6", "rev7", "rev8"] {
        origin.add_change(id, &format!("{id} message\n"), &[(id, "content")]);
    }
    let effects = config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap();
    assert_eq!(effects.len(), 5);
    let rev_ids: Vec<_> = destination
        .published_writes()
        .iter()
        .skip(1)
        .map(|w| w.rev_id.clone())
        .collect();
    assert_eq!(rev_ids, ["rev4", "rev5", "rev6", "rev7", "rev8"]);
}

/// Fails when transforming the given revision, succeeds otherwise.
#[derive(Debug)]
struct FailOn {
    revision: String,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Transformation for FailOn {
    fn describe(&self) -> String {
        format!("fail on '{}'", self.revision)
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        let current = work.current_revision().as_string().to_owned();
        self.seen.lock().unwrap().push(current.clone());
        if current == self.revision {
            Err(TransformError::Other {
                message: format!("refusing to transform '{current}'"),
            })
        } else {
            Ok(())
        }
    }
}

#[test]
fn test_failed_iteration_keeps_earlier_successes() {
    let (origin, destination) = setup();
    let seen = Arc::new(Mutex::new(vec![]));
    register_testing_transformation(
        "fail-on-rev5",
        Arc::new(FailOn {
            revision: "rev5".to_owned(),
            seen: seen.clone(),
        }),
    );
    let config_text = ITERATIVE_CONFIG.replace(
        "mode = \"ITERATIVE\",",
        "mode = \"ITERATIVE\",\n    transformations = [testing.transformation(\"fail-on-rev5\")],",
    );
    let config = load_config(
        &[("copy.bara.sky", config_text.as_str())],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    let workdir = testutils::new_temp_dir();
    config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap();

    origin.add_change("rev4", "change 4\n", &[("d.txt", "four")]);
    origin.add_change("rev5", "change 5\n", &[("e.txt", "five")]);
    origin.add_change("rev6", "change 6\n", &[("f.txt", "six")]);
    let err = config
        .migration("test")
        .unwrap()
        .run(workdir.path(), &[])
        .unwrap_err();

    let MigrationError::Iteration {
        change,
        effects,
        source,
    } = err
    else {
        panic!("expected iteration error");
    };
    assert_eq!(change, "rev5");
    // rev4 made it through and is reported with the failure.
    assert_eq!(effects.len(), 1);
    assert_eq!(
        effects[0].origin_changes[0].revision().as_string(),
        "rev4"
    );
    assert_matches!(*source, MigrationError::Transform(_));
    let written: Vec<_> = destination
        .published_writes()
        .iter()
        .map(|w| w.rev_id.clone())
        .collect();
    assert_eq!(written, ["rev3", "rev4"]);
    // The baseline stays at the last success, so a fixed pipeline resumes
    // from rev5.
    assert_eq!(
        seen.lock().unwrap().iter().unique().collect::<Vec<_>>(),
        ["rev3", "rev4", "rev5"]
    );
}
