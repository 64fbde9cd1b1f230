/// Single-line preview of `s` for log and error details: whitespace runs fold
/// to one space and at most `max` chars are kept, with `...` when cut.
pub fn excerpt(s: &str, max: usize) -> String {
    let mut out = String::new();
    let mut kept = 0;
    for word in s.split_whitespace() {
        let sep = (kept > 0).then_some(' ');
        for c in sep.into_iter().chain(word.chars()) {
            if kept == max {
                out.push_str("...");
                return out;
            }
            out.push(c);
            kept += 1;
        }
    }
    out
}
