/// Selects the source lines for which a stage writes its trace output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingConfig {
    All,
    Between(u32, u32),
    Before(u32),
    After(u32),
    Only(u32),
    Off,
}

impl TracingConfig {
    pub fn includes(&self, line: u32) -> bool {
        match *self {
            TracingConfig::All => true,
            TracingConfig::Between(start, end) => start <= line && line <= end,
            TracingConfig::Before(end) => line <= end,
            TracingConfig::After(start) => start <= line,
            TracingConfig::Only(only) => line == only,
            TracingConfig::Off => false,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig::Off
    }
}

/**
Parses the value of a `--trace-*` option:

```text
all     every line
off     nothing
12      only line 12
3..12   lines 3 through 12
..12    lines up to 12
3..     lines from 3 on
```
 */
impl std::str::FromStr for TracingConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| format!("Invalid line number in trace range: {}", s))
        };

        match s.trim() {
            "all" => Ok(TracingConfig::All),
            "off" => Ok(TracingConfig::Off),
            range => match range.split_once("..") {
                Some(("", "")) => Err(format!("Invalid trace range: {}", s)),
                Some(("", end)) => Ok(TracingConfig::Before(line(end)?)),
                Some((start, "")) => Ok(TracingConfig::After(line(start)?)),
                Some((start, end)) => Ok(TracingConfig::Between(line(start)?, line(end)?)),
                None => Ok(TracingConfig::Only(line(range)?)),
            },
        }
    }
}
