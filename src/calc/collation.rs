//! Spanish-aware name ordering for ranking tie-breaks.
//!
//! Primary level folds case and diacritics (á→a, ü→u, ñ→n). Names equal at
//! primary level are ordered by a secondary pass where the plain letter sorts
//! before its accented form.

use std::cmp::Ordering;

fn fold(c: char) -> (char, u8) {
    match c {
        'á' | 'Á' => ('a', 1),
        'à' | 'À' => ('a', 2),
        'ä' | 'Ä' => ('a', 3),
        'é' | 'É' => ('e', 1),
        'è' | 'È' => ('e', 2),
        'ë' | 'Ë' => ('e', 3),
        'í' | 'Í' => ('i', 1),
        'ì' | 'Ì' => ('i', 2),
        'ï' | 'Ï' => ('i', 3),
        'ó' | 'Ó' => ('o', 1),
        'ò' | 'Ò' => ('o', 2),
        'ö' | 'Ö' => ('o', 3),
        'ú' | 'Ú' => ('u', 1),
        'ù' | 'Ù' => ('u', 2),
        'ü' | 'Ü' => ('u', 3),
        'ñ' | 'Ñ' => ('n', 1),
        'ç' | 'Ç' => ('c', 1),
        other => {
            let mut lower = other.to_lowercase();
            let base = lower.next().unwrap_or(other);
            (base, 0)
        }
    }
}

fn keys(s: &str) -> impl Iterator<Item = (char, u8)> + '_ {
    s.trim().chars().map(fold)
}

pub fn compare_es(a: &str, b: &str) -> Ordering {
    let primary = keys(a).map(|k| k.0).cmp(keys(b).map(|k| k.0));
    if primary != Ordering::Equal {
        return primary;
    }
    let secondary = keys(a).map(|k| k.1).cmp(keys(b).map(|k| k.1));
    if secondary != Ordering::Equal {
        return secondary;
    }
    // Case only; lowercase first keeps the order total.
    b.cmp(a)
}
