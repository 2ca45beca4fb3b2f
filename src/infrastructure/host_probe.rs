use async_trait::async_trait;
use sqlx::PgPool;

/// HostProbe は OS レベルのリソース計測を抽象化する。
///
/// 計測はリソースモニタのループからのみ呼ばれ、リクエスト処理経路では使わない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// コア数で正規化したロードアベレージ（0〜100）。
    async fn cpu_pct(&self) -> anyhow::Result<f64>;
    async fn mem_pct(&self) -> anyhow::Result<f64>;
    async fn disk_pct(&self) -> anyhow::Result<f64>;
    async fn active_connections(&self) -> anyhow::Result<i64>;
}

/// ProcfsProbe は /proc と df を読む Linux 向けの実装。
pub struct ProcfsProbe {
    disk_path: String,
    cpus: usize,
    pool: Option<PgPool>,
}

impl ProcfsProbe {
    pub fn new(disk_path: String, pool: Option<PgPool>) -> Self {
        Self {
            disk_path,
            cpus: num_cpus::get(),
            pool,
        }
    }
}

#[async_trait]
impl HostProbe for ProcfsProbe {
    async fn cpu_pct(&self) -> anyhow::Result<f64> {
        let content = tokio::fs::read_to_string("/proc/loadavg").await?;
        let load = parse_loadavg(&content)?;
        Ok(normalize_load(load, self.cpus))
    }

    async fn mem_pct(&self) -> anyhow::Result<f64> {
        let content = tokio::fs::read_to_string("/proc/meminfo").await?;
        parse_meminfo(&content)
    }

    async fn disk_pct(&self) -> anyhow::Result<f64> {
        let output = tokio::process::Command::new("df")
            .arg("-P")
            .arg(&self.disk_path)
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!(
                "df exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_df(&String::from_utf8_lossy(&output.stdout))
    }

    async fn active_connections(&self) -> anyhow::Result<i64> {
        Ok(match self.pool {
            Some(ref pool) => pool.size() as i64 - pool.num_idle() as i64,
            None => 0,
        })
    }
}

/// /proc/loadavg の 1 分平均を取り出す。
pub fn parse_loadavg(content: &str) -> anyhow::Result<f64> {
    let first = content
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty loadavg"))?;
    Ok(first.parse::<f64>()?)
}

/// ロードアベレージをコア数で割り、100% で頭打ちにする。
pub fn normalize_load(load: f64, cpus: usize) -> f64 {
    let cpus = cpus.max(1) as f64;
    (load / cpus * 100.0).clamp(0.0, 100.0)
}

/// /proc/meminfo から使用率を計算する。MemAvailable が無い古いカーネルでは
/// MemFree + Buffers + Cached を空き容量とみなす。
pub fn parse_meminfo(content: &str) -> anyhow::Result<f64> {
    let field = |name: &str| -> Option<f64> {
        content
            .lines()
            .find(|l| l.starts_with(name) && l[name.len()..].starts_with(':'))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
    };

    let total = field("MemTotal").ok_or_else(|| anyhow::anyhow!("MemTotal missing"))?;
    if total <= 0.0 {
        anyhow::bail!("MemTotal is zero");
    }
    let available = match field("MemAvailable") {
        Some(v) => v,
        None => {
            field("MemFree").unwrap_or(0.0)
                + field("Buffers").unwrap_or(0.0)
                + field("Cached").unwrap_or(0.0)
        }
    };
    Ok(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

/// `df -P` の出力から使用率を計算する。
pub fn parse_df(output: &str) -> anyhow::Result<f64> {
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("df output has no data line"))?;
    let cols: Vec<&str> = line.split_whitespace().collect();
    if cols.len() < 5 {
        anyhow::bail!("unexpected df line: {}", line);
    }
    let used: f64 = cols[2].parse()?;
    let available: f64 = cols[3].parse()?;
    if used + available <= 0.0 {
        return Ok(0.0);
    }
    Ok(used / (used + available) * 100.0)
}
