//! 代码安全分析
//!
//! 在派发前对交互式提交的脚本做静态扫描，产出风险结论。
//! 这是启发式而非证明：漏报是预期内的，目标是拦住常见的失误，
//! 策略（拦截/放行）由调用方决定。

use gridpool_core::{AnalyzerConfig, PoolError, PoolResult};
use gridpool_domain::entities::{RiskLevel, SafetyVerdict};
use regex::Regex;

/// 无条件循环的头部形式
const LOOP_HEADER_PATTERNS: [&str; 2] = [
    r"^\s*while\s+(True|1|not\s+False)\s*:",
    r"^\s*for\s+\w+\s+in\s+itertools\.count\(",
];

/// 循环体内可以离开循环的语句
const LOOP_EXIT_PATTERN: &str = r"\b(break|return)\b|sys\.exit\(";

#[derive(Debug)]
struct Finding {
    line: usize,
    risk: RiskLevel,
    message: String,
}

pub struct CodeSafetyAnalyzer {
    enabled: bool,
    loop_headers: Vec<Regex>,
    loop_exit: Regex,
    big_range: Regex,
    block_patterns: Vec<Regex>,
    warn_patterns: Vec<Regex>,
}

impl CodeSafetyAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> PoolResult<Self> {
        let compile = |patterns: &[String]| -> PoolResult<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        PoolError::Configuration(format!("无效的分析模式 `{p}`: {e}"))
                    })
                })
                .collect()
        };

        Ok(Self {
            enabled: config.enabled,
            loop_headers: LOOP_HEADER_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("内置模式必须合法"))
                .collect(),
            loop_exit: Regex::new(LOOP_EXIT_PATTERN).expect("内置模式必须合法"),
            big_range: Regex::new(r"range\(\s*\d{6,}\s*\)").expect("内置模式必须合法"),
            block_patterns: compile(&config.block_patterns)?,
            warn_patterns: compile(&config.warn_patterns)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 扫描源码并给出结论，绝不执行代码
    pub fn analyze(&self, code: &str) -> SafetyVerdict {
        let lines: Vec<&str> = code.lines().collect();

        // 没有任何语句的提交是允许的
        if !lines
            .iter()
            .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        {
            return SafetyVerdict::safe();
        }

        let mut findings = Vec::new();
        self.scan_loops(&lines, &mut findings);
        self.scan_patterns(&lines, &mut findings);
        findings.sort_by_key(|f| f.line);

        let risk = findings
            .iter()
            .map(|f| f.risk)
            .max()
            .unwrap_or(RiskLevel::Safe);

        SafetyVerdict {
            risk,
            reasons: findings.into_iter().map(|f| f.message).collect(),
            suggestions: self.suggest(code),
        }
    }

    /// 无条件循环检查：按缩进界定循环块，在块内找可达的退出语句
    fn scan_loops(&self, lines: &[&str], findings: &mut Vec<Finding>) {
        for (idx, line) in lines.iter().enumerate() {
            if !self.loop_headers.iter().any(|p| p.is_match(line)) {
                continue;
            }

            let header_indent = indent_of(line);
            let block_end = find_block_end(lines, idx, header_indent);
            let body_indent = lines[idx + 1..block_end]
                .iter()
                .filter(|l| !l.trim().is_empty())
                .map(|l| indent_of(l))
                .min();

            let mut exit_at_body_level = false;
            let mut exit_nested = false;
            for body_line in &lines[idx + 1..block_end] {
                if body_line.trim().is_empty() || !self.loop_exit.is_match(body_line) {
                    continue;
                }
                match body_indent {
                    Some(base) if indent_of(body_line) > base => exit_nested = true,
                    _ => exit_at_body_level = true,
                }
            }

            let finding = if exit_at_body_level {
                Finding {
                    line: idx + 1,
                    risk: RiskLevel::Warn,
                    message: format!("第{}行: 无条件循环（含退出语句），建议改用显式条件", idx + 1),
                }
            } else if exit_nested {
                Finding {
                    line: idx + 1,
                    risk: RiskLevel::Warn,
                    message: format!(
                        "第{}行: 无条件循环的退出语句嵌套在条件分支内，无法确认可达",
                        idx + 1
                    ),
                }
            } else {
                Finding {
                    line: idx + 1,
                    risk: RiskLevel::Block,
                    message: format!("第{}行: 检测到没有退出语句的无限循环", idx + 1),
                }
            };
            findings.push(finding);
        }
    }

    fn scan_patterns(&self, lines: &[&str], findings: &mut Vec<Finding>) {
        for (idx, line) in lines.iter().enumerate() {
            for pattern in &self.block_patterns {
                if pattern.is_match(line) {
                    findings.push(Finding {
                        line: idx + 1,
                        risk: RiskLevel::Block,
                        message: format!(
                            "第{}行: 命中资源破坏性模式 `{}`",
                            idx + 1,
                            pattern.as_str()
                        ),
                    });
                }
            }
            for pattern in &self.warn_patterns {
                if pattern.is_match(line) {
                    findings.push(Finding {
                        line: idx + 1,
                        risk: RiskLevel::Warn,
                        message: format!(
                            "第{}行: 检测到资源密集型操作 `{}`",
                            idx + 1,
                            pattern.as_str()
                        ),
                    });
                }
            }
        }
    }

    /// 针对已知危险形态给出更安全的写法建议
    fn suggest(&self, code: &str) -> Vec<String> {
        let mut suggestions = Vec::new();
        if self
            .loop_headers
            .iter()
            .any(|p| code.lines().any(|l| p.is_match(l)))
        {
            suggestions.push("考虑用 for i in range(max_iterations) 设定迭代上限".to_string());
            suggestions.push("在 while 条件中加入计数器检查".to_string());
        }
        if self.big_range.is_match(code) {
            suggestions.push("大范围迭代建议分批处理或改用生成器".to_string());
            suggestions.push("可定期输出进度: if i % 1000 == 0: print(i)".to_string());
        }
        suggestions
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// 循环块在缩进回到头部级别（或更浅）处结束
fn find_block_end(lines: &[&str], header_idx: usize, header_indent: usize) -> usize {
    for (offset, line) in lines[header_idx + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= header_indent {
            return header_idx + 1 + offset;
        }
    }
    lines.len()
}
