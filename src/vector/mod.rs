//! Pure vector math over float slices: cosine similarity/distance, centroid,
//! a little-endian float⇄byte codec, and a fixed-capacity top-K selector.
//!
//! All arithmetic accumulates in `f64` to minimize drift even though the
//! stored representation is `f32`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Cosine similarity. Returns 0.0 for empty input, mismatched lengths, or
/// either vector having zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// `1 - cosine_similarity(a, b)`, bounded in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// Component-wise mean of a set of vectors. Vectors whose length differs
/// from the first non-empty vector's length are skipped. Returns an empty
/// vector if there is nothing to average.
pub fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dim = match vectors.iter().find(|v| !v.is_empty()) {
        Some(v) => v.len(),
        None => return Vec::new(),
    };

    let mut sum = vec![0.0f64; dim];
    let mut count = 0u64;
    for v in vectors {
        if v.len() != dim {
            continue;
        }
        for (s, &x) in sum.iter_mut().zip(v.iter()) {
            *s += x as f64;
        }
        count += 1;
    }

    if count == 0 {
        return Vec::new();
    }

    sum.into_iter().map(|s| (s / count as f64) as f32).collect()
}

/// Pack a float32 slice as little-endian bytes, 4 bytes per component.
pub fn f32_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for &x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Unpack little-endian bytes into a float32 vector. Returns an empty
/// vector if `bytes.len()` is not a multiple of 4.
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() % 4 != 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A candidate scored for top-K selection. Ordering and equality are by
/// `score` only; ties in `item` are not distinguished.
#[derive(Debug, Clone)]
pub struct ScoredItem<T> {
    pub score: f64,
    pub item: T,
}

// Min-heap ordering: reverse the natural f64 comparison so the *smallest*
// score sits at the heap's root, letting us evict it first once at capacity.
// PartialEq/Eq/Ord are all written in terms of `score` alone (not derived,
// since deriving would bound them on `T: PartialEq`/`T: Eq` for no reason —
// `item` never participates in comparison).
impl<T> PartialEq for ScoredItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}
impl<T> Eq for ScoredItem<T> {}
impl<T> PartialOrd for ScoredItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for ScoredItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
    }
}

/// Select the top `k` items by descending score using a fixed-capacity
/// min-heap (`O(n log k)`), falling back to a full sort when `n <= k`.
///
/// `k == 0` returns an empty vector; `k >= items.len()` returns every item
/// sorted descending by score.
pub fn top_k_heap<T>(items: Vec<ScoredItem<T>>, k: usize) -> Vec<ScoredItem<T>> {
    if k == 0 || items.is_empty() {
        return Vec::new();
    }

    if k >= items.len() {
        let mut sorted = items;
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        return sorted;
    }

    let mut heap: BinaryHeap<ScoredItem<T>> = BinaryHeap::with_capacity(k);
    for item in items {
        if heap.len() < k {
            heap.push(item);
        } else if let Some(min) = heap.peek() {
            if item.score > min.score {
                heap.pop();
                heap.push(item);
            }
        }
    }

    let mut out: Vec<ScoredItem<T>> = heap.into_vec();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, len: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; len];
        v[dim % len] = 1.0;
        v
    }

    #[test]
    fn cosine_similarity_self_is_one() {
        let v = unit(3, 8);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = unit(0, 8);
        let b = unit(1, 8);
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_empty_or_mismatched_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_zero_norm_is_zero() {
        let zero = vec![0.0f32; 4];
        let v = unit(0, 4);
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
    }

    #[test]
    fn cosine_similarity_bounded() {
        let a = vec![1.0, 0.5, -0.3];
        let b = vec![-0.2, 1.0, 0.7];
        let sim = cosine_similarity(&a, &b);
        assert!((-1.0 - 1e-6..=1.0 + 1e-6).contains(&sim));
        let dist = cosine_distance(&a, &b);
        assert!((dist - (1.0 - sim)).abs() < 1e-9);
    }

    #[test]
    fn bytes_round_trip() {
        let v = vec![1.0f32, -2.5, 0.0, 3.75];
        let bytes = f32_to_bytes(&v);
        assert_eq!(bytes_to_f32(&bytes), v);
    }

    #[test]
    fn bytes_to_f32_rejects_non_multiple_of_four() {
        assert_eq!(bytes_to_f32(&[1, 2, 3]), Vec::<f32>::new());
        assert_eq!(bytes_to_f32(&[1, 2, 3, 4, 5]), Vec::<f32>::new());
    }

    #[test]
    fn centroid_of_two_orthogonal_unit_vectors() {
        let a = unit(0, 4);
        let b = unit(1, 4);
        let c = centroid(&[a, b]);
        assert_eq!(c, vec![0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn centroid_skips_mismatched_dimensions() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = centroid(&[a.clone(), b]);
        assert_eq!(c, a);
    }

    #[test]
    fn centroid_of_empty_is_empty() {
        assert_eq!(centroid(&[]), Vec::<f32>::new());
    }

    #[test]
    fn top_k_heap_k_zero_is_empty() {
        let items = vec![ScoredItem { score: 1.0, item: "a" }];
        assert!(top_k_heap(items, 0).is_empty());
    }

    #[test]
    fn top_k_heap_empty_input_is_empty() {
        let items: Vec<ScoredItem<&str>> = Vec::new();
        assert!(top_k_heap(items, 5).is_empty());
    }

    #[test]
    fn top_k_heap_k_ge_len_returns_all_sorted() {
        let items = vec![
            ScoredItem { score: 0.3, item: "c" },
            ScoredItem { score: 0.9, item: "a" },
            ScoredItem { score: 0.6, item: "b" },
        ];
        let out = top_k_heap(items, 10);
        let order: Vec<&str> = out.iter().map(|s| s.item).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn top_k_heap_selects_highest_scores() {
        let items = (0..20)
            .map(|i| ScoredItem {
                score: i as f64,
                item: i,
            })
            .collect();
        let out = top_k_heap(items, 3);
        let order: Vec<i32> = out.iter().map(|s| s.item).collect();
        assert_eq!(order, vec![19, 18, 17]);
    }
}
