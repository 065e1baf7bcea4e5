use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{thread_rng, Rng};
use tangier_api::xmlmanip::{inject_tags, ElementTag, Predicate, Tags, XmlSchema};

const BASE: &str = r#"<tangier version="1.0" method="provider.request"><admin_user>u</admin_user><admin_pwd>p</admin_pwd><providers/></tangier>"#;

fn schedule_document(shifts: usize) -> String {
    let mut rng = thread_rng();
    let mut xml = String::from(r#"<tangier method="schedule.response"><schedule><dates><date shiftdate="05/01/2017"><shifts>"#);
    for i in 0..shifts {
        xml.push_str(&format!(
            "<shift><siteid>{}</siteid><empid>{}</empid><providername>Provider {}</providername>\
             <actualstarttime>07:00 AM</actualstarttime><reportedminutes>{}</reportedminutes></shift>",
            100 + i % 10,
            rng.gen_range(1000..9999),
            i,
            rng.gen_range(0..720)
        ));
    }
    xml.push_str("</shifts></date></dates></schedule></tangier>");
    xml
}

pub fn inject_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("inject_tags");

    for count in [1usize, 50, 500].iter() {
        let tags: Tags = (0..*count)
            .map(|i| {
                (
                    format!("provider__{}", i),
                    ElementTag::new()
                        .attr("action", "info")
                        .inner(Tags::new().with("emp_id", i.to_string())),
                )
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &tags, |b, tags| {
            b.iter(|| inject_tags(black_box(BASE), "providers", 0, tags).unwrap());
        });
    }
    group.finish();
}

pub fn search_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_search");

    for shifts in [10usize, 100, 1000].iter() {
        let xml = schedule_document(*shifts);
        group.bench_with_input(BenchmarkId::new("parse_and_search", shifts), &xml, |b, xml| {
            b.iter(|| {
                let schema = XmlSchema::parse(black_box(xml)).unwrap();
                schema.search(&Predicate::contains("siteid", "")).len()
            });
        });

        let schema = XmlSchema::parse(&xml).unwrap();
        group.bench_with_input(BenchmarkId::new("search_only", shifts), &schema, |b, schema| {
            b.iter(|| schema.search(&Predicate::equals("siteid", "105")).len());
        });
    }
    group.finish();
}

criterion_group!(benches, inject_benchmark, search_benchmark);
criterion_main!(benches);
