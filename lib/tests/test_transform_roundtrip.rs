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

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use skiff_lib::authoring::Author;
use skiff_lib::console::LogConsole;
use skiff_lib::metadata::Metadata;
use skiff_lib::revision::Changes;
use skiff_lib::revision::Revision;
use skiff_lib::transform::Sequence;
use skiff_lib::transform::Transformation as _;
use skiff_lib::transform_work::TransformWork;
use testutils::transformations::AppendLine;
use testutils::transformations::PrefixMessage;

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, tree: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if entry.file_type().unwrap().is_dir() {
                walk(root, &path, tree);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned();
                tree.insert(relative, fs::read(&path).unwrap());
            }
        }
    }
    let mut tree = BTreeMap::new();
    walk(dir, dir, &mut tree);
    tree
}

fn new_work(dir: &Path) -> TransformWork {
    TransformWork::new(
        dir.to_path_buf(),
        Metadata::new("summary\n", Author::new("A", "a@example.com")),
        Changes::default(),
        LogConsole::shared(),
        "roundtrip",
        Revision::new("rev1"),
    )
}

#[test]
fn test_reversible_pipeline_roundtrips_the_workdir() {
    let temp_dir = testutils::new_temp_dir();
    let dir = temp_dir.path();
    fs::write(dir.join("a.txt"), "alpha\n").unwrap();
    fs::create_dir(dir.join("sub")).unwrap();
    fs::write(dir.join("sub/b.txt"), "beta\n").unwrap();
    let before = snapshot(dir);

    let pipeline = Sequence::new(vec![
        Arc::new(AppendLine::new("a.txt", "generated")),
        Arc::new(AppendLine::new("sub/b.txt", "also generated")),
        Arc::new(PrefixMessage::new("IMPORT: ")),
    ]);

    let mut work = new_work(dir);
    pipeline.transform(&mut work).unwrap();
    assert!(snapshot(dir) != before);
    assert_eq!(work.message(), "IMPORT: summary\n");

    let mut reversed_work = new_work(dir);
    reversed_work.set_message(work.message());
    let reversed = pipeline.reverse().unwrap();
    reversed.transform(&mut reversed_work).unwrap();

    // The reverse of the pipeline restores the tree bytewise and undoes
    // the metadata edit.
    assert_eq!(snapshot(dir), before);
    assert_eq!(reversed_work.message(), "summary\n");
}

#[test]
fn test_double_reverse_is_forward() {
    let temp_dir = testutils::new_temp_dir();
    let dir = temp_dir.path();
    fs::write(dir.join("a.txt"), "alpha\n").unwrap();

    let pipeline = Sequence::new(vec![Arc::new(AppendLine::new("a.txt", "generated"))]);
    let twice = pipeline.reverse().unwrap().reverse().unwrap();
    let mut work = new_work(dir);
    twice.transform(&mut work).unwrap();
    assert_eq!(
        fs::read_to_string(dir.join("a.txt")).unwrap(),
        "alpha\ngenerated\n"
    );
}
