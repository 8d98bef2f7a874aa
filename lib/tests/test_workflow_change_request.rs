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

use std::fs;
use std::sync::Arc;

use assert_matches::assert_matches;
use indoc::indoc;
use pretty_assertions::assert_eq;
use skiff_lib::migration::MigrationError;
use skiff_lib::options::Options;
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

const CHANGE_REQUEST_CONFIG: &str = indoc! {r#"
    core.workflow(
        name = "review",
        origin = testing.origin(),
        destination = testing.destination(),
        authoring = authoring.pass_thru("Default <default@example.com>"),
        mode = "CHANGE_REQUEST",
        transformations = [testing.prefix_message("REVIEW: ")],
    )
"#};

fn setup() -> (Arc<TestingOrigin>, Arc<RecordingDestination>) {
    let origin = TestingOrigin::new();
    origin.add_change("rev1", "base\n", &[("a.txt", "one")]);
    origin.add_change("rev2", "proposed change\n", &[("b.txt", "two")]);
    let destination = RecordingDestination::new();
    set_testing_endpoints(origin.clone(), destination.clone());
    (origin, destination)
}

fn options_with_baseline(confirm: bool) -> Options {
    let mut options = test_options();
    options.workflow.change_request_baseline = Some("rev1".to_owned());
    options.workflow.confirm_change_request = confirm;
    options
}

#[test]
fn test_change_request_defaults_to_dry_run() {
    let (_origin, destination) = setup();
    let config = load_config(
        &[("copy.bara.sky", CHANGE_REQUEST_CONFIG)],
        Arc::new(options_with_baseline(false)),
        TestConsole::new(),
    )
    .unwrap();
    let workdir = testutils::new_temp_dir();
    let effects = config
        .migration("review")
        .unwrap()
        .run(workdir.path(), &["rev2".to_owned()])
        .unwrap();
    assert_eq!(effects.len(), 1);

    // The preview is recorded but not published.
    assert_eq!(destination.published_writes().len(), 0);
    let writes = destination.writes();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].dry_run);
    assert_eq!(writes[0].baseline.as_deref(), Some("rev1"));
    assert_eq!(
        writes[0].message.lines().next().unwrap(),
        "REVIEW: proposed change"
    );
    assert_eq!(writes[0].context_reference.as_deref(), Some("rev2"));
}

#[test]
fn test_confirmed_change_request_publishes() {
    let (_origin, destination) = setup();
    let config = load_config(
        &[("copy.bara.sky", CHANGE_REQUEST_CONFIG)],
        Arc::new(options_with_baseline(true)),
        TestConsole::new(),
    )
    .unwrap();
    let workdir = testutils::new_temp_dir();
    config
        .migration("review")
        .unwrap()
        .run(workdir.path(), &["rev2".to_owned()])
        .unwrap();
    assert_eq!(destination.published_writes().len(), 1);
}

#[test]
fn test_change_request_requires_baseline() {
    let (_origin, _destination) = setup();
    let config = load_config(
        &[("copy.bara.sky", CHANGE_REQUEST_CONFIG)],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    let workdir = testutils::new_temp_dir();
    let err = config
        .migration("review")
        .unwrap()
        .run(workdir.path(), &["rev2".to_owned()])
        .unwrap_err();
    assert_matches!(err, MigrationError::Internal { .. });
    assert!(err.to_string().contains("baseline"));
}

/// Copies one file from the destination baseline into the checkout.
#[derive(Debug)]
struct CopyFromDestination;

impl Transformation for CopyFromDestination {
    fn describe(&self) -> String {
        "copy a.txt from the destination".to_owned()
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        let reader = work
            .destination_reader()
            .ok_or_else(|| TransformError::Other {
                message: "no destination reader available".to_owned(),
            })?;
        let content = reader
            .read_file("a.txt")
            .map_err(|err| TransformError::Other {
                message: err.to_string(),
            })?;
        fs::write(work.checkout_dir().join("from_dest.txt"), content).map_err(|err| {
            TransformError::Other {
                message: err.to_string(),
            }
        })?;
        Ok(())
    }
}

#[test]
fn test_transformations_can_read_destination_content() {
    let (_origin, destination) = setup();
    register_testing_transformation("copy-from-destination", Arc::new(CopyFromDestination));
    let config_text = indoc! {r#"
        core.workflow(
            name = "seed",
            origin = testing.origin(),
            destination = testing.destination(),
            authoring = authoring.pass_thru("Default <default@example.com>"),
        )

        core.workflow(
            name = "review",
            origin = testing.origin(),
            destination = testing.destination(),
            authoring = authoring.pass_thru("Default <default@example.com>"),
            mode = "CHANGE_REQUEST",
            reversible_check = False,
            transformations = [testing.transformation("copy-from-destination")],
        )
    "#};
    let config = load_config(
        &[("copy.bara.sky", config_text)],
        Arc::new(options_with_baseline(false)),
        TestConsole::new(),
    )
    .unwrap();

    // Seed the destination so the baseline has content to read.
    let workdir = testutils::new_temp_dir();
    config
        .migration("seed")
        .unwrap()
        .run(workdir.path(), &["rev1".to_owned()])
        .unwrap();

    config
        .migration("review")
        .unwrap()
        .run(workdir.path(), &["rev2".to_owned()])
        .unwrap();
    let writes = destination.writes();
    assert_eq!(writes.len(), 2);
    let preview = &writes[1];
    assert!(preview.dry_run);
    assert_eq!(preview.files.get("from_dest.txt").unwrap(), b"one");
}

#[test]
fn test_change_request_reversible_check_defaults_on() {
    let (_origin, _destination) = setup();
    // prefix_message is reversible, so validation passes; an irreversible
    // pipeline would be rejected without an explicit opt-out.
    let config = load_config(
        &[("copy.bara.sky", CHANGE_REQUEST_CONFIG)],
        Arc::new(options_with_baseline(false)),
        TestConsole::new(),
    )
    .unwrap();
    assert_eq!(
        skiff_lib::validate::validate_config(&config, &["review"]),
        vec![]
    );

    let irreversible = CHANGE_REQUEST_CONFIG.replace(
        "testing.prefix_message(\"REVIEW: \")",
        "testing.write_file(\"gen.txt\", \"generated\")",
    );
    let config = load_config(
        &[("copy.bara.sky", irreversible.as_str())],
        Arc::new(options_with_baseline(false)),
        TestConsole::new(),
    )
    .unwrap();
    let messages = skiff_lib::validate::validate_config(&config, &["review"]);
    assert!(skiff_lib::validate::has_errors(&messages));
}
