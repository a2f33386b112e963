//! Criterion benchmarks for repograph-core.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init + migration overhead.
//! 2. **extraction**: Parse + symbol extraction per language, and the
//!    parallel pipeline over a synthetic repository.
//! 3. **mapping**: Import resolution and reference mapping.
//! 4. **graph**: Draft building and finishing a versioned graph.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/repograph-core/Cargo.toml
//! # Run only the mapping group:
//! cargo bench --manifest-path crates/repograph-core/Cargo.toml -- mapping
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;

use repograph_core::config::TieBreak;
use repograph_core::graph::builder::build_draft;
use repograph_core::indexer::imports::RepoLayout;
use repograph_core::indexer::pipeline::{extract_file, parallel_extract, FileInput, PipelineOptions};
use repograph_core::indexer::relations::map_relations;
use repograph_core::indexer::symbols::FileSymbols;
use repograph_core::models::SourceFile;
use repograph_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const PYTHON_SOURCE: &str = r#"
import os
from typing import Optional

from app.models import User
from app.store import Repository


class UserService(Repository):
    def __init__(self, root: str):
        self.root = root
        self.cache = {}

    def find(self, user_id: int) -> Optional[User]:
        if user_id in self.cache:
            return self.cache[user_id]
        user = self.load(user_id)
        self.cache[user_id] = user
        return user

    def load(self, user_id: int) -> User:
        path = os.path.join(self.root, str(user_id))
        return User.from_path(path)


def make_service() -> UserService:
    return UserService("/var/users")
"#;

const JAVA_SOURCE: &str = r#"
package com.example.service;

import com.example.model.User;
import com.example.store.Repository;
import java.util.HashMap;
import java.util.Map;

public class UserService extends Repository implements Lookup {
    private final Map<Integer, User> cache = new HashMap<>();

    public User find(int id) {
        User cached = cache.get(id);
        if (cached != null) {
            return cached;
        }
        User user = load(id);
        cache.put(id, user);
        return user;
    }

    private User load(int id) {
        return User.fromId(id);
    }
}
"#;

const TYPESCRIPT_SOURCE: &str = r#"
import { User } from "./models";
import { Repository } from "./store";

export interface Lookup {
  find(id: number): User | undefined;
}

export class UserService extends Repository implements Lookup {
  private cache = new Map<number, User>();

  find(id: number): User | undefined {
    const cached = this.cache.get(id);
    if (cached) {
      return cached;
    }
    const user = this.load(id);
    this.cache.set(id, user);
    return user;
  }

  private load(id: number): User {
    return User.fromId(id);
  }
}

export function makeService(): UserService {
  return new UserService();
}
"#;

const GO_SOURCE: &str = r#"
package service

import (
	"fmt"

	"example.com/app/model"
)

type UserService struct {
	cache map[int]*model.User
}

func NewUserService() *UserService {
	return &UserService{cache: map[int]*model.User{}}
}

func (s *UserService) Find(id int) *model.User {
	if user, ok := s.cache[id]; ok {
		return user
	}
	user := s.load(id)
	s.cache[id] = user
	return user
}

func (s *UserService) load(id int) *model.User {
	fmt.Println("loading", id)
	return model.FromID(id)
}
"#;

fn input(path: &str, source: &str) -> FileInput {
    FileInput {
        path: path.to_string(),
        content: Ok(source.as_bytes().to_vec()),
    }
}

/// A Python package of `n` modules where every module imports and calls
/// into its predecessor, plus one shared helper name defined twice.
fn synthetic_repo(n: usize) -> Vec<FileInput> {
    let mut inputs = Vec::with_capacity(n + 2);
    inputs.push(input("pkg/util_a.py", "def helper():\n    return 1\n"));
    inputs.push(input("pkg/util_b.py", "def helper():\n    return 2\n"));
    for i in 0..n {
        let body = if i == 0 {
            "class Step0:\n    def run(self):\n        return helper()\n".to_string()
        } else {
            let prev = i - 1;
            format!(
                "from pkg.mod_{prev} import Step{prev}\n\n\
                 class Step{i}(Step{prev}):\n\
                 \x20   def run(self):\n\
                 \x20       self.prepare()\n\
                 \x20       return Step{prev}().run()\n\n\
                 \x20   def prepare(self):\n\
                 \x20       return helper()\n"
            )
        };
        inputs.push(FileInput {
            path: format!("pkg/mod_{i}.py"),
            content: Ok(body.into_bytes()),
        });
    }
    inputs
}

fn extracted(n: usize) -> (Vec<SourceFile>, Vec<FileSymbols>, RepoLayout) {
    let results = parallel_extract(&synthetic_repo(n), &PipelineOptions::default());
    let mut files = Vec::with_capacity(results.len());
    let mut symbols = Vec::new();
    for result in results {
        files.push(result.file);
        symbols.extend(result.symbols);
    }
    let layout = RepoLayout::new(files.iter().map(|f| f.path.clone()), None);
    (files, symbols, layout)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            migrate_schema(&conn).unwrap();
            black_box(&conn);
        });
    });
}

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    let options = PipelineOptions::default();

    let samples = [
        ("python", input("app/service.py", PYTHON_SOURCE)),
        ("java", input("src/com/example/service/UserService.java", JAVA_SOURCE)),
        ("typescript", input("src/service/user-service.ts", TYPESCRIPT_SOURCE)),
        ("go", input("service/user.go", GO_SOURCE)),
    ];
    for (language, sample) in &samples {
        group.bench_function(BenchmarkId::new("extract_file", language), |b| {
            b.iter(|| black_box(extract_file(black_box(sample), &options)));
        });
    }

    for n in [50usize, 200] {
        let inputs = synthetic_repo(n);
        group.bench_with_input(BenchmarkId::new("parallel_extract", n), &inputs, |b, inputs| {
            b.iter(|| black_box(parallel_extract(inputs, &options)));
        });
    }

    group.finish();
}

fn bench_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapping");

    for n in [50usize, 200] {
        let (_, symbols, layout) = extracted(n);
        group.bench_with_input(BenchmarkId::new("map_relations", n), &n, |b, _| {
            b.iter(|| black_box(map_relations(&symbols, &layout, TieBreak::MostRecent)));
        });
    }

    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");

    for n in [50usize, 200] {
        let (files, symbols, layout) = extracted(n);
        let relations = map_relations(&symbols, &layout, TieBreak::MostRecent);
        group.bench_with_input(BenchmarkId::new("build_and_finish", n), &n, |b, _| {
            b.iter(|| {
                let draft = build_draft(&files, &relations).unwrap();
                black_box(draft.finish("bench", "job"))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_schema_init,
    bench_extraction,
    bench_mapping,
    bench_graph,
);
criterion_main!(benches);
