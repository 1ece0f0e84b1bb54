use criterion::{black_box, criterion_group, criterion_main, Criterion};

use aqs_core::results::{BloomsDistribution, DifficultyScores};
use aqs_core::scoring::{ScoreInputs, ScoringEngine};

fn difficulty() -> DifficultyScores {
    DifficultyScores {
        complexity_score: 6.0,
        complexity_rationale: String::new(),
        language_difficulty_score: 5.0,
        language_difficulty_rationale: String::new(),
        cognitive_effort_score: 7.0,
        cognitive_effort_rationale: String::new(),
        course_alignment_score: 8.0,
        course_alignment_rationale: String::new(),
    }
}

fn bench_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("components");
    let engine = ScoringEngine::default();
    let scores = difficulty();
    let blooms = BloomsDistribution {
        remember: 30.0,
        understand: 30.0,
        apply: 20.0,
        analyze: 10.0,
        evaluate: 5.0,
        create: 5.0,
    };

    group.bench_function("difficulty", |b| {
        b.iter(|| engine.difficulty_component(black_box(&scores)))
    });

    group.bench_function("blooms", |b| {
        b.iter(|| engine.blooms_component(black_box(&blooms)))
    });

    group.finish();
}

fn bench_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute");
    let engine = ScoringEngine::default();

    group.bench_function("with_course_fit", |b| {
        let inputs = ScoreInputs {
            difficulty: 65.0,
            blooms: 42.86,
            course_fit: Some(80.0),
            question_count: 10,
            difficulty_appropriateness: Some(60.0),
        };
        b.iter(|| engine.compute(black_box(&inputs)))
    });

    group.bench_function("standalone_small_sample", |b| {
        let inputs = ScoreInputs {
            difficulty: 65.0,
            blooms: 42.86,
            course_fit: None,
            question_count: 3,
            difficulty_appropriateness: None,
        };
        b.iter(|| engine.compute(black_box(&inputs)))
    });

    group.finish();
}

criterion_group!(benches, bench_components, bench_compute);
criterion_main!(benches);
