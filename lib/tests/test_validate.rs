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

use indoc::indoc;
use pretty_assertions::assert_eq;
use skiff_lib::validate::ValidationLevel;
use skiff_lib::validate::has_errors;
use skiff_lib::validate::validate_config;
use testutils::RecordingDestination;
use testutils::TestConsole;
use testutils::TestingOrigin;
use testutils::load_config;
use testutils::set_testing_endpoints;
use testutils::test_options;

fn install_endpoints() {
    let origin = TestingOrigin::new();
    origin.add_change("rev1", "test summary\n", &[("file.txt", "content")]);
    set_testing_endpoints(origin, RecordingDestination::new());
}

#[test]
fn test_empty_config_is_an_error() {
    install_endpoints();
    let config = load_config(
        &[("copy.bara.sky", "x = 1\n")],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    let messages = validate_config(&config, &[]);
    assert!(has_errors(&messages));
    assert!(messages[0].text.contains("does not define any migration"));
}

#[test]
fn test_requested_migration_must_exist() {
    install_endpoints();
    let config = load_config(
        &[(
            "copy.bara.sky",
            indoc! {r#"
                core.workflow(
                    name = "present",
                    origin = testing.origin(),
                    destination = testing.destination(),
                    authoring = authoring.pass_thru("D <d@example.com>"),
                )
            "#},
        )],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    let messages = validate_config(&config, &["present", "absent"]);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, ValidationLevel::Error);
    assert!(messages[0].text.contains("Unknown migration 'absent'"));
}

#[test]
fn test_reversible_check_rejects_irreversible_transformation() {
    install_endpoints();
    let config = load_config(
        &[(
            "copy.bara.sky",
            indoc! {r#"
                core.workflow(
                    name = "default",
                    origin = testing.origin(),
                    destination = testing.destination(),
                    authoring = authoring.pass_thru("D <d@example.com>"),
                    transformations = [
                        testing.prefix_message("prefix: "),
                        testing.write_file("gen.txt", "generated"),
                    ],
                    reversible_check = True,
                )
            "#},
        )],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    let messages = validate_config(&config, &["default"]);
    assert!(has_errors(&messages));
    // The failing transformation is named.
    assert!(
        messages[0].text.contains("write file 'gen.txt'"),
        "got: {}",
        messages[0].text
    );
}

#[test]
fn test_reversible_pipeline_passes() {
    install_endpoints();
    let config = load_config(
        &[(
            "copy.bara.sky",
            indoc! {r#"
                core.workflow(
                    name = "default",
                    origin = testing.origin(),
                    destination = testing.destination(),
                    authoring = authoring.pass_thru("D <d@example.com>"),
                    transformations = [testing.prefix_message("prefix: ")],
                    reversible_check = True,
                )
            "#},
        )],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    assert_eq!(validate_config(&config, &["default"]), vec![]);
}

#[test]
fn test_dropping_reversible_check_passes_with_irreversible_pipeline() {
    install_endpoints();
    let config = load_config(
        &[(
            "copy.bara.sky",
            indoc! {r#"
                core.workflow(
                    name = "default",
                    origin = testing.origin(),
                    destination = testing.destination(),
                    authoring = authoring.pass_thru("D <d@example.com>"),
                    transformations = [testing.write_file("gen.txt", "generated")],
                )
            "#},
        )],
        Arc::new(test_options()),
        TestConsole::new(),
    )
    .unwrap();
    assert_eq!(validate_config(&config, &["default"]), vec![]);
}
