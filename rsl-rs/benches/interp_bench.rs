use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rsl::model::{sql, MetaModel};
use rsl::script::{evaluate, parse_text, Runtime};

const ARCH: &str = "
.function row
  .param inst_ref r
  .assign half = r.Num / 2
| ${r.Num} | $u{r.Name} | ${half} |
.end function
.select many rows from instances of Row where (selected.Num > 10) ordered_by (Num)
.for each r in rows
  .invoke f = row(r)
${f.body}\\
  .if (last rows)
end
  .end if
.end for
";

fn make_model(rows: usize) -> MetaModel {
    let mut src = String::from("CREATE TABLE Row (Num INTEGER, Name STRING);\n");
    for i in 0..rows {
        src.push_str(&format!("INSERT INTO Row VALUES ({}, 'row {i}');\n", (i * 7919) % 1000));
    }
    let mut m = MetaModel::new();
    sql::load_str(&mut m, &src).expect("bench schema");
    m
}

fn bench_interp(c: &mut Criterion) {
    let mut g = c.benchmark_group("interp");

    g.bench_function("parse", |b| b.iter(|| parse_text(black_box(ARCH), "bench.arc")));

    let body = parse_text(ARCH, "bench.arc").expect("bench archetype");
    for rows in [100, 1000] {
        let model = make_model(rows);
        g.bench_function(format!("evaluate_{rows}"), |b| {
            b.iter(|| {
                let mut rt = Runtime::new(model.clone()).capture_output();
                evaluate(&mut rt, black_box(&body), &[]).expect("bench run");
                rt.buffer().len()
            })
        });
    }

    g.finish();
}

criterion_group!(benches, bench_interp);
criterion_main!(benches);
