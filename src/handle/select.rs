// 交互选择, 批处理路径不依赖终端

use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::Mutex;

use crate::error::{Error, Result};

pub trait Selector: Send + Sync {
    // 选一个
    fn select_one(&self, prompt: &str, candidates: &[String]) -> Result<usize>;

    // 选多个, 按候选顺序
    fn select_many(&self, prompt: &str, candidates: &[String]) -> Result<Vec<usize>>;

    // 是/否, 拒绝为 Ok(false)
    fn confirm(&self, prompt: &str) -> Result<bool>;

    // 口令等秘密, 取不到时为 None
    fn secret(&self, prompt: &str) -> Result<Option<String>>;
}

// 自动确认, 从不读输入
// select_one 取第一个; select_many 为空 (无人值守时必须指定库名)
// confirm 为 true; secret 为 None (口令只能来自环境变量)
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoSelector;

impl Selector for AutoSelector {
    fn select_one(&self, prompt: &str, candidates: &[String]) -> Result<usize> {
        if candidates.is_empty() {
            return Err(Error::config(format!("{}: nothing to choose from", prompt)));
        }
        Ok(0)
    }

    fn select_many(&self, _prompt: &str, _candidates: &[String]) -> Result<Vec<usize>> {
        Ok(Vec::new())
    }

    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }

    fn secret(&self, _prompt: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

// 按行交互, 通常是 stdin/stderr
pub struct ConsoleSelector<R, W> {
    io: Mutex<(R, W)>,
}

impl ConsoleSelector<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        ConsoleSelector::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleSelector<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        ConsoleSelector {
            io: Mutex::new((reader, writer)),
        }
    }

    fn ask(&self, text: &str) -> Result<Option<String>> {
        let mut guard = self
            .io
            .lock()
            .map_err(|_| Error::config("console prompt lock poisoned"))?;
        let (reader, writer) = &mut *guard;
        write!(writer, "{}", text)?;
        writer.flush()?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn list(&self, prompt: &str, candidates: &[String]) -> Result<()> {
        let mut guard = self
            .io
            .lock()
            .map_err(|_| Error::config("console prompt lock poisoned"))?;
        let (_, writer) = &mut *guard;
        writeln!(writer, "{}", prompt)?;
        for (i, c) in candidates.iter().enumerate() {
            writeln!(writer, "  [{}] {}", i + 1, c)?;
        }
        Ok(())
    }
}

impl<R, W> Selector for ConsoleSelector<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn select_one(&self, prompt: &str, candidates: &[String]) -> Result<usize> {
        if candidates.is_empty() {
            return Err(Error::config(format!("{}: nothing to choose from", prompt)));
        }
        self.list(prompt, candidates)?;
        loop {
            let answer = self
                .ask(&format!("choose 1-{} [1]: ", candidates.len()))?
                .ok_or_else(|| Error::config("no selection made (end of input)"))?;
            if answer.is_empty() {
                return Ok(0);
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=candidates.len()).contains(&n) => return Ok(n - 1),
                _ => self.list("invalid choice, try again:", &[])?,
            }
        }
    }

    fn select_many(&self, prompt: &str, candidates: &[String]) -> Result<Vec<usize>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.list(prompt, candidates)?;
        loop {
            let Some(answer) = self.ask("choose (e.g. 1,3-5 or all): ")? else {
                return Ok(Vec::new());
            };
            match parse_selection(&answer, candidates.len()) {
                Some(picked) => return Ok(picked),
                None => self.list("invalid selection, try again:", &[])?,
            }
        }
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        let answer = self.ask(&format!("{} [y/N]: ", prompt))?;
        Ok(matches!(
            answer.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y") | Some("yes")
        ))
    }

    fn secret(&self, prompt: &str) -> Result<Option<String>> {
        Ok(self
            .ask(&format!("{}: ", prompt))?
            .filter(|s| !s.is_empty()))
    }
}

// 解析 1,3-5 / all, 返回排序去重的下标 (从 0 开始)
pub fn parse_selection(input: &str, len: usize) -> Option<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") || input == "*" {
        return Some((0..len).collect());
    }
    let mut picked = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (lo, hi) = match part.split_once('-') {
            Some((a, b)) => (a.trim().parse::<usize>().ok()?, b.trim().parse::<usize>().ok()?),
            None => {
                let n = part.parse::<usize>().ok()?;
                (n, n)
            }
        };
        if lo == 0 || hi > len || lo > hi {
            return None;
        }
        picked.extend(lo - 1..hi);
    }
    if picked.is_empty() {
        return None;
    }
    picked.sort_unstable();
    picked.dedup();
    Some(picked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn console(input: &str) -> ConsoleSelector<Cursor<Vec<u8>>, Vec<u8>> {
        ConsoleSelector::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn auto_selector_is_deterministic() {
        let auto = AutoSelector;
        let c = names(&["a", "b"]);
        assert_eq!(auto.select_one("pick", &c).unwrap(), 0);
        assert!(auto.select_many("pick", &c).unwrap().is_empty());
        assert!(auto.confirm("go?").unwrap());
        assert_eq!(auto.secret("pw").unwrap(), None);
        assert!(auto.select_one("pick", &[]).is_err());
    }

    #[test]
    fn selection_ranges() {
        assert_eq!(parse_selection("1,3-4", 5), Some(vec![0, 2, 3]));
        assert_eq!(parse_selection("all", 3), Some(vec![0, 1, 2]));
        assert_eq!(parse_selection("2,2", 3), Some(vec![1]));
        assert_eq!(parse_selection("0", 3), None);
        assert_eq!(parse_selection("4", 3), None);
        assert_eq!(parse_selection("x", 3), None);
        assert_eq!(parse_selection("", 3), None);
    }

    #[test]
    fn console_retries_until_valid() {
        let sel = console("9\n2\n");
        assert_eq!(sel.select_one("db", &names(&["a", "b"])).unwrap(), 1);
    }

    #[test]
    fn console_empty_answer_takes_first() {
        let sel = console("\n");
        assert_eq!(sel.select_one("db", &names(&["a", "b"])).unwrap(), 0);
    }

    #[test]
    fn console_confirm_defaults_to_no() {
        assert!(console("yes\n").confirm("wipe?").unwrap());
        assert!(!console("\n").confirm("wipe?").unwrap());
        assert!(!console("").confirm("wipe?").unwrap());
    }

    #[test]
    fn console_many_stops_at_eof() {
        assert!(console("").select_many("db", &names(&["a"])).unwrap().is_empty());
        assert_eq!(
            console("2-3\n").select_many("db", &names(&["a", "b", "c"])).unwrap(),
            vec![1, 2]
        );
    }
}
