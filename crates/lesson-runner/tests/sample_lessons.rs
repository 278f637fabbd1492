use std::path::Path;

use recognition::{Domain, LessonConfig};

fn sample(name: &str) -> LessonConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("lessons").join(name);
    LessonConfig::load(&path).unwrap()
}

#[test]
fn bundled_lessons_load() {
    let alphabet = sample("alphabet.toml");
    assert_eq!(alphabet.domain, Domain::Alphabet);
    assert!(alphabet.spelling.is_none());

    let intro = sample("introductions.toml");
    let resolved = intro.resolve_with(Some("Ana"), |_| None);
    assert_eq!(resolved.lesson.domain, Domain::Sentence);
    assert_eq!(resolved.lesson.threshold, 0.45);
    let spelling = resolved.spelling.unwrap();
    assert_eq!(spelling.config.name, "ANA");
    assert_eq!(spelling.profile.repeat_count, 1);
    assert_eq!(resolved.retry.max_attempts, 5);
}
