/// Waits for the first of the given futures. Breaks the enclosing loop once the cancellation
/// token fires or a future resolves with `Err`, `continue`s it on `Ok`.
#[macro_export]
macro_rules! continue_until_cancelled {
    ($token:expr, $($fut:expr),+ $(,)?) => {{
        tokio::select! {
            () = $token.cancelled() => {
                break;
            }
            $(
                res = $fut => {
                    match res {
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                },
            )+
        };
    }};
}
