use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// A short content digest of a task result, used to key the result cache.
///
/// Every value carried through the result map implements this. Types with a
/// cheap identity (a file revision, an upstream etag) implement it directly;
/// everything else digests its canonical JSON form through [`digest_of`].
pub trait ContentDigest {
    fn digest(&self) -> String;
}

/// Digests a serializable value by hashing its canonical JSON bytes.
///
/// Panics when the value cannot be serialized, which for the types used as
/// task results is a programmer error.
pub fn digest_of<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).expect("task result must serialize to JSON for digesting");
    format!("{:016x}", seahash::hash(&bytes))
}

macro_rules! digest_via_json {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ContentDigest for $ty {
                fn digest(&self) -> String {
                    digest_of(self)
                }
            }
        )*
    };
}

digest_via_json!(
    String,
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    isize,
    f32,
    f64,
    (),
    serde_json::Value,
);

impl ContentDigest for Duration {
    fn digest(&self) -> String {
        digest_of(&(self.as_secs(), self.subsec_nanos()))
    }
}

impl<T: ContentDigest> ContentDigest for Option<T> {
    fn digest(&self) -> String {
        match self {
            Some(value) => format!("{:016x}", seahash::hash(value.digest().as_bytes())),
            None => digest_of(&()),
        }
    }
}

impl<T: ContentDigest> ContentDigest for Vec<T> {
    fn digest(&self) -> String {
        let mut joined = String::with_capacity(self.len() * 16);
        for value in self {
            joined.push_str(&value.digest());
        }
        format!("{:016x}", seahash::hash(joined.as_bytes()))
    }
}

impl<T: ContentDigest + ?Sized> ContentDigest for Arc<T> {
    fn digest(&self) -> String {
        (**self).digest()
    }
}
